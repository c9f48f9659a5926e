//! End-to-end job runs: activation, context building, task entry points,
//! sync primitives and job bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use tether_engine::{Engine, EngineConfig, Linker, MemoryQueue, Operator, StaticHttp, UreqFetch};
use tether_storage::{
    install_schema, HostModel, Job, JobState, Link, LogLevel, LogRecord, MemoryStore, Project,
    Query, RecordId, RecordRef, RecordStore, Setting, SettingKind, StoreExt, Task, Trigger,
    TriggerSpec,
};

struct Fixture {
    store: Arc<MemoryStore>,
    engine: Engine,
    project_id: RecordId,
}

fn fixture(config: EngineConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    install_schema(store.as_ref()).unwrap();
    store
        .add(HostModel {
            model: "res.partner".into(),
            name: "Contact".into(),
            fields: vec!["name".into(), "email".into()],
            ..HostModel::default()
        })
        .unwrap();
    let project = store
        .add(Project {
            name: "Demo".into(),
            active: true,
            ..Project::default()
        })
        .unwrap();
    let engine = Engine::new(
        store.clone(),
        Arc::new(StaticHttp::new()),
        Arc::new(MemoryQueue::new()),
        config,
    );
    Fixture {
        store,
        engine,
        project_id: project.id,
    }
}

impl Fixture {
    fn task(&self, code: &str) -> Task {
        self.store
            .add(Task {
                project_id: self.project_id,
                name: "Test".into(),
                code: code.into(),
                magic_button: Some("Go".into()),
                active: true,
                ..Task::default()
            })
            .unwrap()
    }

    fn press(&self, code: &str) -> Vec<Job> {
        let task = self.task(code);
        self.engine
            .press_button(&Operator::user("demo"), task.id)
            .unwrap();
        self.engine.run_pending().unwrap()
    }

    fn messages(&self) -> Vec<String> {
        self.store
            .find::<LogRecord>(&Query::new())
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect()
    }
}

#[test]
fn button_runs_handle_button() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press("def handle_button():\n    log('pressed by ' + user['name'])\n");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Done);
    assert!(f.messages().contains(&"pressed by demo".to_string()));
}

#[test]
fn set_link_twice_keeps_one_link() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press(
        r#"
def handle_button():
    partner = create_record("res.partner", {"name": "Ada"})
    partner.set_link("github_issue", "gh#123")
    partner.set_link("github_issue", "gh#123")
    found = search_links("github_issue", ["gh#123"])
    log("linked " + str(found.record.id))
"#,
    );
    assert_eq!(jobs[0].state, JobState::Done, "{:?}", jobs[0].error);
    let links: Vec<Link> = f.store.find(&Query::new()).unwrap();
    assert_eq!(links.len(), 1);
    let partner = RecordRef::new("res.partner", 1);
    assert_eq!(links[0].record, Some(partner.clone()));
    assert!(f.messages().contains(&"linked 1".to_string()));

    let linker = Linker::new(f.store.clone(), f.project_id);
    let found = linker
        .search_links_external("github_issue", &["gh#123".to_string()], None)
        .unwrap();
    assert_eq!(found.records(), vec![partner]);
}

#[test]
fn external_to_host_sync_creates_each_key_once() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press(
        r#"
CONTACTS = [{"id": 1, "name": "Ada"}, {"id": 2, "name": "Bob"}, {"id": 1, "name": "Ada"}]

def handle_button():
    info = {
        "relation": "contact",
        "x": {"get_ref": lambda c: c["id"]},
        "host": {"create": lambda c: create_record("res.partner", {"name": c["name"]})},
    }
    first = sync_x2host(CONTACTS, info, create=True)
    second = sync_x2host(CONTACTS, info, create=True)
    log("created %s then %s" % (first["created"], second["created"]))
"#,
    );
    assert_eq!(jobs[0].state, JobState::Done, "{:?}", jobs[0].error);
    assert_eq!(f.store.search("res.partner", &Query::new()).unwrap().len(), 2);
    assert_eq!(f.store.count::<Link>(&Query::new()).unwrap(), 2);
    assert!(f.messages().contains(&"created 2 then 0".to_string()));
}

#[test]
fn underscore_getattr_fails_the_job_with_a_validation_error() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press("def handle_button():\n    getattr(PARAMS, '_secret')\n");
    assert_eq!(jobs[0].state, JobState::Failed);
    let error = jobs[0].error.clone().unwrap();
    assert!(error.contains("You cannot use _secret with getattr"), "{}", error);
}

#[test]
fn url_helpers_cannot_read_local_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host_secret.txt");
    std::fs::write(&path, "s3cr3t").unwrap();

    let mut f = fixture(EngineConfig::default());
    f.engine = Engine::new(
        f.store.clone(),
        Arc::new(UreqFetch::new(Duration::from_secs(1))),
        Arc::new(MemoryQueue::new()),
        EngineConfig::default(),
    );
    let code = format!(
        "def handle_button():\n    log(url2bin('file://{}').decode())\n",
        path.display()
    );
    let jobs = f.press(&code);
    assert_eq!(jobs[0].state, JobState::Failed);
    let error = jobs[0].error.clone().unwrap();
    assert!(error.starts_with("validation error: url2bin: only http and https URLs"), "{}", error);
    assert!(!f.messages().iter().any(|m| m.contains("s3cr3t")));
}

#[test]
fn retryable_errors_are_retried_then_fail_unmodified() {
    let f = fixture(EngineConfig {
        max_retries: 2,
        ..EngineConfig::default()
    });
    let jobs = f.press("def handle_button():\n    raise RetryableJobError('rate limited')\n");
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].state, JobState::Retry);
    assert_eq!(jobs[1].state, JobState::Failed);
    assert_eq!(jobs[1].attempts, 2);
    assert_eq!(jobs[1].error.as_deref(), Some("rate limited"));
}

#[test]
fn logs_survive_a_failed_job() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press(
        "def handle_button():\n    log('before')\n    create_record('res.partner', {'name': 'x'})\n    raise UserError('stop')\n",
    );
    assert_eq!(jobs[0].state, JobState::Failed);
    assert!(f.messages().contains(&"before".to_string()));
    let errors: Vec<LogRecord> = f
        .store
        .find(&Query::new().eq("level", "error"))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].level, LogLevel::Error);
    // the partner write was rolled back with the job
    assert!(f.store.search("res.partner", &Query::new()).unwrap().is_empty());
}

#[test]
fn add_job_runs_a_child_after_the_parent_commits() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press(
        r#"
def greet(name, punctuation="."):
    log("hello " + name + punctuation)

def handle_button():
    add_job("greet", priority=5)("Ada", punctuation="!")
"#,
    );
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.state == JobState::Done));
    let child = &jobs[1];
    assert_eq!(child.parent_job_id, Some(jobs[0].id));
    assert_eq!(child.function.as_deref(), Some("greet"));
    assert!(f.messages().contains(&"hello Ada!".to_string()));
}

#[test]
fn webhook_payload_reaches_the_task_and_params_persist() {
    let f = fixture(EngineConfig::default());
    let task = f.task(
        "def handle_webhook(payload):\n    PARAMS['LAST_ORDER'] = payload['id']\n",
    );
    let trigger = f
        .store
        .add(Trigger {
            id: 0,
            project_id: f.project_id,
            task_id: task.id,
            trigger_name: "orders".into(),
            active: true,
            spec: TriggerSpec::Webhook {
                webhook_type: "json".into(),
            },
        })
        .unwrap();
    let job = f
        .engine
        .fire(&Operator::user("web"), trigger.id, Some(serde_json::json!({"id": 7})))
        .unwrap();
    assert_eq!(job.trigger_name.as_deref(), Some("orders"));
    let jobs = f.engine.run_pending().unwrap();
    assert_eq!(jobs[0].state, JobState::Done, "{:?}", jobs[0].error);
    let params: Vec<Setting> = f
        .store
        .fetch_all(SettingKind::Param.table(), &Query::new().eq("key", "LAST_ORDER"))
        .unwrap();
    assert_eq!(params[0].value.as_deref(), Some("7"));
}

#[test]
fn automation_triggers_pass_record_handles() {
    let f = fixture(EngineConfig::default());
    let partner = f
        .store
        .create(
            "res.partner",
            serde_json::json!({"name": "Ada"}).as_object().cloned().unwrap(),
        )
        .unwrap();
    let task = f.task("def handle_db(records):\n    for r in records:\n        r.email = r.name + '@example.com'\n");
    let trigger = f
        .store
        .add(Trigger {
            id: 0,
            project_id: f.project_id,
            task_id: task.id,
            trigger_name: "on_partner".into(),
            active: true,
            spec: TriggerSpec::Automation {
                model: "res.partner".into(),
                trigger: "on_create_or_write".into(),
                filter_pre_domain: None,
                filter_domain: None,
                trigger_fields: vec![],
            },
        })
        .unwrap();
    f.engine
        .fire_automation(
            &Operator::user("system"),
            trigger.id,
            &[RecordRef::new("res.partner", partner)],
        )
        .unwrap();
    let jobs = f.engine.run_pending().unwrap();
    assert_eq!(jobs[0].state, JobState::Done, "{:?}", jobs[0].error);
    let row = f.store.read("res.partner", partner).unwrap();
    assert_eq!(row.values["email"], "Ada@example.com");
}

#[test]
fn missing_entry_point_fails_the_job() {
    let f = fixture(EngineConfig::default());
    let jobs = f.press("x = 1\n");
    assert_eq!(jobs[0].state, JobState::Failed);
    assert!(jobs[0].error.clone().unwrap().contains("does not define handle_button"));
}
