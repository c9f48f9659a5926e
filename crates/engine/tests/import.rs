//! Bundle import: upserts by stable code, initial values, task triggers and
//! the all-or-nothing transaction.

use std::sync::Arc;
use std::time::Duration;

use tether_engine::{
    Bundle, DirectorySource, EngineConfig, EngineError, HttpResponse, Importer, MemoryBundleSource,
    Operator, ProjectPatch, Projects, StaticHttp, UreqFetch,
};
use tether_storage::{
    install_schema, DataFile, HostModel, MemoryStore, Project, Query, RecordId, SettingKind,
    RecordStore, StoreExt, Task, Trigger, TriggerSpec,
};

const SYNC_TASK: &str = r#""""
TITLE: Sync partners
MAGIC_BUTTON: Sync now
CRON:
  - name: nightly
    interval_number: 2
WEBHOOK:
  - name: partner_hook
DB_TRIGGERS:
  - name: on_partner
    model: res.partner
    trigger_fields: name, email
    filter_domain: "[('id', '!=', {TASK_ID})]"
"""

def handle_button():
    log("sync")

def handle_cron():
    pass
"#;

const SETUP_TASK: &str = "\"\"\"\nTITLE: Setup\n\"\"\"\n\ndef handle_cron():\n    pass\n";

fn bundle() -> Bundle {
    Bundle {
        description: Some("Partners".into()),
        updated_at: Some("2024-03-01T10:00:00Z".into()),
        ..Bundle::default()
    }
    .with_file("README.md", "# Partners\n\nKeeps contacts in sync.\n")
    .with_file(
        "settings.markdown",
        "---\nAPI_URL: https://api.example.com\nPAGE_SIZE: 50\n---\n# Parameters\n",
    )
    .with_file("settings.secrets.markdown", "---\nTOKEN:\n---\n")
    .with_file(
        "library.py",
        "def greet(name):\n    return 'hi ' + name\nexport(greet)\n",
    )
    .with_raw_file("data.emoji.csv", "https://example.com/emoji.csv")
    .with_file("task.sync.py", SYNC_TASK)
    .with_file("task.sync.markdown", "Push partners out.")
    .with_file("task.setup.py", SETUP_TASK)
}

fn setup() -> (Arc<MemoryStore>, Importer, RecordId) {
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
    let project = store.add(Project::default()).unwrap();
    let http = StaticHttp::new().with(
        "https://example.com/emoji.csv",
        HttpResponse::ok("emoji,name\n🙂,smile\n"),
    );
    let importer = Importer::new(store.clone(), Arc::new(http), EngineConfig::default());
    (store, importer, project.id)
}

fn setting(store: &MemoryStore, pid: RecordId, kind: SettingKind, key: &str) -> Option<String> {
    let config = EngineConfig::default();
    Projects::new(store, &config)
        .setting(kind, pid, key)
        .unwrap()
        .and_then(|s| s.value)
}

fn counts(store: &MemoryStore) -> [usize; 4] {
    [
        store.count::<Task>(&Query::new()).unwrap(),
        store.count::<Trigger>(&Query::new()).unwrap(),
        store.count::<DataFile>(&Query::new()).unwrap(),
        store
            .search(SettingKind::Param.table(), &Query::new())
            .unwrap()
            .len(),
    ]
}

#[test]
fn import_fills_the_project() {
    let (store, importer, pid) = setup();
    let project = importer
        .import_bundle(&Operator::user("demo"), pid, &bundle())
        .unwrap();

    assert_eq!(project.name, "Partners");
    assert_eq!(project.source_updated_at.as_deref(), Some("2024-03-01T10:00:00Z"));
    assert!(project.description.contains("<h1>Partners</h1>"));
    assert_eq!(
        project.data_description,
        "<h1>Please add datas.markdown file to place some documentation here</h1>"
    );
    assert!(project.common_code.contains("def greet"));
    assert_eq!(
        setting(&store, pid, SettingKind::Param, "API_URL").as_deref(),
        Some("https://api.example.com")
    );
    assert_eq!(setting(&store, pid, SettingKind::Param, "PAGE_SIZE").as_deref(), Some("50"));
    assert_eq!(setting(&store, pid, SettingKind::Secret, "TOKEN"), None);

    let tasks: Vec<Task> = store.find(&Query::new()).unwrap();
    let sync = tasks.iter().find(|t| t.name == "Sync partners").unwrap();
    assert_eq!(sync.magic_button.as_deref(), Some("Sync now"));
    assert_eq!(sync.sync_order_description.as_deref(), Some("<p>Push partners out.</p>\n"));
    assert!(sync.code.starts_with("# \"\"\""));
    let setup = tasks.iter().find(|t| t.name == "Setup").unwrap();
    assert_eq!(setup.magic_button, None);

    let data: Vec<DataFile> = store.find(&Query::new()).unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].name, "emoji");
    assert_eq!(data[0].file_name, "data.emoji.csv");
}

#[test]
fn task_triggers_come_from_front_matter() {
    let (store, importer, pid) = setup();
    importer
        .import_bundle(&Operator::user("demo"), pid, &bundle())
        .unwrap();
    let triggers: Vec<Trigger> = store.find(&Query::new()).unwrap();
    assert_eq!(triggers.len(), 3);
    let by_name = |name: &str| triggers.iter().find(|t| t.trigger_name == name).unwrap();

    assert_eq!(
        by_name("nightly").spec,
        TriggerSpec::Cron {
            interval_number: 2,
            interval_type: "days".into()
        }
    );
    assert_eq!(
        by_name("partner_hook").spec,
        TriggerSpec::Webhook {
            webhook_type: "json".into()
        }
    );
    let automation = by_name("on_partner");
    let TriggerSpec::Automation {
        model,
        trigger,
        filter_domain,
        trigger_fields,
        ..
    } = &automation.spec
    else {
        panic!("expected an automation trigger");
    };
    assert_eq!(model, "res.partner");
    assert_eq!(trigger, "on_create_or_write");
    assert_eq!(trigger_fields, &vec!["name".to_string(), "email".to_string()]);
    assert_eq!(
        filter_domain.as_deref(),
        Some(format!("[('id', '!=', {})]", automation.task_id).as_str())
    );
}

#[test]
fn reimport_is_idempotent_and_keeps_edited_values() {
    let (store, importer, pid) = setup();
    let op = Operator::user("demo");
    importer.import_bundle(&op, pid, &bundle()).unwrap();
    let before = counts(&store);

    let config = EngineConfig::default();
    Projects::new(store.as_ref(), &config)
        .set_setting(SettingKind::Param, pid, "PAGE_SIZE", Some("10".into()))
        .unwrap();
    Projects::new(store.as_ref(), &config)
        .write_project(
            &op,
            pid,
            ProjectPatch {
                name: Some("Renamed".into()),
                ..ProjectPatch::default()
            },
        )
        .unwrap();

    let project = importer.import_bundle(&op, pid, &bundle()).unwrap();
    assert_eq!(counts(&store), before);
    assert_eq!(setting(&store, pid, SettingKind::Param, "PAGE_SIZE").as_deref(), Some("10"));
    assert_eq!(project.name, "Renamed");
}

#[test]
fn invalid_task_code_rolls_back_everything() {
    let (store, importer, pid) = setup();
    let bad = bundle().with_file("task.broken.py", "\"\"\"\nTITLE: Broken\n\"\"\"\ndef oops(:\n");
    let err = importer
        .import_bundle(&Operator::user("demo"), pid, &bad)
        .unwrap_err();
    assert!(matches!(err, EngineError::Import { .. }));
    assert!(err.to_string().contains("Invalid python code at file task.broken.py"));
    assert_eq!(counts(&store), [0, 0, 0, 0]);
    let project: Project = store.get(pid).unwrap();
    assert!(project.name.is_empty());
}

#[test]
fn missing_data_download_names_the_status() {
    let store = Arc::new(MemoryStore::new());
    install_schema(store.as_ref()).unwrap();
    let project = store.add(Project::default()).unwrap();
    let importer = Importer::new(
        store.clone(),
        Arc::new(StaticHttp::new()),
        EngineConfig::default(),
    );
    let bundle = Bundle::default().with_raw_file("data.rows.json", "https://example.com/rows.json");
    let err = importer
        .import_bundle(&Operator::user("demo"), project.id, &bundle)
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Failed to fetch raw content from https://example.com/rows.json. Status code: 404"));
}

#[test]
fn unknown_trigger_model_is_reported() {
    let (_, importer, pid) = setup();
    let task = "\"\"\"\nTITLE: Orders\nDB_TRIGGERS:\n  - name: on_order\n    model: sale.order\n\"\"\"\n";
    let bundle = Bundle::default().with_file("task.orders.py", task);
    let err = importer
        .import_bundle(&Operator::user("demo"), pid, &bundle)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "validation error: Model sale.order is not available. Check if you need to install an extra module first."
    );
}

#[test]
fn only_managers_import_core_code() {
    let (_, importer, pid) = setup();
    let bundle = bundle().with_file("core.py", "def secret_sauce():\n    return 42\nexport(secret_sauce)\n");
    let err = importer
        .import_bundle(&Operator::user("demo"), pid, &bundle)
        .unwrap_err();
    assert!(matches!(err, EngineError::Access(_)));

    let project = importer
        .import_bundle(&Operator::manager("admin"), pid, &bundle)
        .unwrap();
    assert!(project.core_code.contains("secret_sauce"));
}

#[tokio::test]
async fn upgrade_needs_a_source_url() {
    let (_, importer, pid) = setup();
    let err = importer
        .upgrade(&MemoryBundleSource::new(), &Operator::user("demo"), pid)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please provide url to the gist page");
}

#[tokio::test]
async fn upgrade_from_a_local_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "# Local\n").unwrap();
    std::fs::write(dir.path().join("task.setup.py"), SETUP_TASK).unwrap();
    std::fs::write(dir.path().join("data.rows.json"), "[1, 2, 3]").unwrap();

    let store = Arc::new(MemoryStore::new());
    install_schema(store.as_ref()).unwrap();
    let project = store
        .add(Project {
            source_url: Some(dir.path().to_string_lossy().into_owned()),
            ..Project::default()
        })
        .unwrap();
    let importer = Importer::new(
        store.clone(),
        Arc::new(UreqFetch::new(Duration::from_secs(5)).with_local_files()),
        EngineConfig::default(),
    );
    let project = importer
        .upgrade(&DirectorySource::new(None), &Operator::user("demo"), project.id)
        .await
        .unwrap();

    assert_eq!(project.name, "Sync 🪬 Studio");
    let data: Vec<DataFile> = store.find(&Query::new()).unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].content, "WzEsIDIsIDNd");
    assert_eq!(store.count::<Task>(&Query::new()).unwrap(), 1);
}
