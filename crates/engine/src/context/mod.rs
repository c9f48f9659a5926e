//! Evaluation context assembly.
//!
//! Every job gets a fresh [`Runtime`] and a fresh namespace; nothing is
//! cached across jobs because parameters and secrets may change in between.
//!
//! ```text
//! helpers + SECRETS + PARAMS + DATA + MAGIC
//!   └─▶ core_code (elevated)            ──▶ core exports, CORE
//! helpers + views + WEBHOOKS + CORE + core exports
//!   └─▶ common_code (baseline)          ──▶ library exports, LIB
//! library namespace + library exports + LIB
//!   └─▶ task code
//! ```

mod helpers;
pub mod records;
mod sync_fns;
pub mod views;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use tether_script::{Interpreter, Namespace, Sandbox, ScriptError, Value};
use tether_storage::{
    DataFile, Job, LogLevel, Project, Query, RecordId, RecordStore, SettingKind, StoreExt,
    Trigger, TriggerKind,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::http::HttpFetch;
use crate::jobs::{EnqueueOptions, JobLogger, LogEntry};
use crate::linker::Linker;
use crate::projects::{Operator, Projects};
use crate::properties::Properties;

pub use records::{LinkSetHandle, RecordHandle};
pub use views::{ConfigView, DataHandle};

/// What the helpers of one job close over.
pub struct Runtime {
    pub store: Arc<dyn RecordStore>,
    pub http: Arc<dyn HttpFetch>,
    pub config: EngineConfig,
    pub project: Project,
    pub job: Job,
    pub operator: Operator,
    pub logger: JobLogger,
    pub linker: Linker,
    pub properties: Properties,
    function: RefCell<String>,
    pending: RefCell<Vec<(RecordId, EnqueueOptions)>>,
}

impl Runtime {
    pub fn new(
        store: Arc<dyn RecordStore>,
        http: Arc<dyn HttpFetch>,
        config: EngineConfig,
        project: Project,
        job: Job,
        operator: Operator,
    ) -> Self {
        let logger = JobLogger::new(
            store.clone(),
            project.id,
            job.id,
            config.separate_log_transaction,
        );
        let function = job.function.clone().unwrap_or_default();
        Runtime {
            linker: Linker::new(store.clone(), project.id),
            properties: Properties::new(store.clone(), project.id),
            logger,
            store,
            http,
            config,
            project,
            job,
            operator,
            function: RefCell::new(function),
            pending: RefCell::new(Vec::new()),
        }
    }

    /// Store a job log entry, tagged with the running entry point unless the
    /// entry names its own function.
    pub fn log(&self, entry: LogEntry) -> Result<RecordId, EngineError> {
        let entry = if entry.function.is_empty() {
            let function = self.function.borrow().clone();
            entry.function(&function)
        } else {
            entry
        };
        self.logger.log(entry)
    }

    pub fn set_function(&self, name: &str) {
        *self.function.borrow_mut() = name.to_string();
    }

    /// Schedule a stored sub-job once the current job commits.
    pub fn defer_job(&self, job_id: RecordId, options: EnqueueOptions) {
        self.pending.borrow_mut().push((job_id, options));
    }

    pub fn take_pending(&self) -> Vec<(RecordId, EnqueueOptions)> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

/// The evaluated tiers of one project.
pub struct Context {
    /// Final namespace for task code.
    pub namespace: Namespace,
    pub core: Namespace,
    pub library: Namespace,
}

fn setting_values(
    store: &dyn RecordStore,
    kind: SettingKind,
    project_id: RecordId,
) -> Result<IndexMap<String, Value>, EngineError> {
    Ok(store
        .fetch_all::<tether_storage::Setting>(kind.table(), &Query::new().eq("project_id", project_id))?
        .into_iter()
        .map(|s| (s.key, s.value.map(Value::from).unwrap_or(Value::None)))
        .collect())
}

/// `PARAMS`: parameters and text templates in one view. Assignment writes
/// through to the setting it came from, or creates a parameter.
fn params_view(rt: &Rc<Runtime>) -> Result<ConfigView, EngineError> {
    let store = rt.store.as_ref();
    let mut entries = setting_values(store, SettingKind::Param, rt.project.id)?;
    let texts = setting_values(store, SettingKind::Text, rt.project.id)?;
    let text_keys: HashSet<String> = texts.keys().cloned().collect();
    for (key, value) in texts {
        if entries.contains_key(&key) {
            return Err(EngineError::Validation(format!(
                "Project Templates and Settings should not have parameters with the same key: {}",
                key
            )));
        }
        entries.insert(key, value);
    }

    let r = rt.clone();
    Ok(ConfigView::persistent("PARAMS", entries, move |key, value| {
        let kind = if text_keys.contains(key) {
            SettingKind::Text
        } else {
            SettingKind::Param
        };
        let stored = if value.is_none() {
            None
        } else {
            Some(value.to_str())
        };
        Projects::new(r.store.as_ref(), &r.config).set_setting(kind, r.project.id, key, stored)?;
        Ok(())
    }))
}

fn data_view(rt: &Runtime) -> Result<ConfigView, EngineError> {
    let files: Vec<DataFile> = rt
        .store
        .find(&Query::new().eq("project_id", rt.project.id))?;
    let entries = files
        .into_iter()
        .map(|f| (f.name.clone(), Value::host(DataHandle::new(f))))
        .collect();
    Ok(ConfigView::read_only("DATA", entries))
}

fn webhooks_view(rt: &Runtime) -> Result<ConfigView, EngineError> {
    let triggers: Vec<Trigger> = rt
        .store
        .find(&Query::new().eq("project_id", rt.project.id))?;
    let entries = triggers
        .into_iter()
        .filter(|t| t.spec.kind() == TriggerKind::Webhook)
        .map(|t| {
            let url = rt.config.webhook_url(rt.project.id, &t.trigger_name);
            (t.trigger_name, Value::str(&url))
        })
        .collect();
    Ok(ConfigView::read_only("WEBHOOKS", entries))
}

fn evaluate_tier(
    sandbox: Sandbox,
    interp: &mut Interpreter,
    code: &str,
    injected: &Namespace,
    label: &str,
) -> Result<Namespace, EngineError> {
    if code.trim().is_empty() {
        return Ok(Namespace::new());
    }
    sandbox
        .evaluate(interp, code, injected)
        .map_err(|e: ScriptError| match EngineError::from(e) {
            EngineError::Validation(m) => EngineError::Validation(format!("{}: {}", label, m)),
            other => other,
        })
}

/// Build the namespace task code runs in: helpers, configuration views and
/// both evaluated code tiers.
pub fn build(rt: &Rc<Runtime>, interp: &mut Interpreter) -> Result<Context, EngineError> {
    rt.log(LogEntry::new(LogLevel::Debug, "Let's prepare Evaluation Context"))?;

    let helpers = helpers::namespace(rt);
    let secrets = ConfigView::read_only(
        "SECRETS",
        setting_values(rt.store.as_ref(), SettingKind::Secret, rt.project.id)?,
    );
    let secrets = Value::host(secrets);
    let params = Value::host(params_view(rt)?);
    let data = Value::host(data_view(rt)?);
    let webhooks = Value::host(webhooks_view(rt)?);
    let magic = Value::host(ConfigView::exports("MAGIC", &helpers));

    let mut core_ns = helpers.clone();
    core_ns
        .register("MAGIC", magic.clone())
        .register("SECRETS", secrets.clone())
        .register("PARAMS", params.clone())
        .register("DATA", data.clone());
    let core = evaluate_tier(
        Sandbox::new(rt.config.elevated_ruleset()),
        interp,
        &rt.project.core_code,
        &core_ns,
        "Core Code",
    )?;
    debug!(project_id = rt.project.id, exports = core.len(), "core code evaluated");

    let mut library_ns = helpers.clone();
    library_ns
        .register("MAGIC", magic)
        .register("SECRETS", secrets)
        .register("PARAMS", params)
        .register("DATA", data)
        .register("WEBHOOKS", webhooks)
        .register("CORE", Value::host(ConfigView::exports("CORE", &core)));
    library_ns.extend(&core);
    let library = evaluate_tier(
        Sandbox::new(rt.config.baseline_ruleset()),
        interp,
        &rt.project.common_code,
        &library_ns,
        "Library Code",
    )?;
    debug!(project_id = rt.project.id, exports = library.len(), "library code evaluated");

    let mut namespace = library_ns;
    namespace.extend(&library);
    namespace.register("LIB", Value::host(ConfigView::exports("LIB", &library)));

    rt.log(LogEntry::new(LogLevel::Debug, "Evaluation Context is ready!"))?;
    Ok(Context {
        namespace,
        core,
        library,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_script::Args;
    use tether_storage::{install_schema, MemoryStore, Setting};

    use crate::http::StaticHttp;

    fn runtime(project: Project) -> (Arc<MemoryStore>, Rc<Runtime>) {
        let store = Arc::new(MemoryStore::new());
        install_schema(store.as_ref()).unwrap();
        let project = store.add(project).unwrap();
        let rt = Runtime::new(
            store.clone(),
            Arc::new(StaticHttp::new()),
            EngineConfig::default(),
            project,
            Job::default(),
            Operator::manager("admin"),
        );
        (store, Rc::new(rt))
    }

    #[test]
    fn core_exports_reach_library_and_tasks() {
        let (_, rt) = runtime(Project {
            core_code: "def double(x):\n    return x * 2\nexport(double)\n".into(),
            common_code: "def quad(x):\n    return CORE.double(double(x))\nexport(quad)\n".into(),
            ..Project::default()
        });
        let mut interp = Interpreter::default();
        let ctx = build(&rt, &mut interp).unwrap();
        assert!(ctx.core.contains("double"));
        let quad = ctx.namespace.callable("quad").unwrap().clone();
        let result = interp.call(&quad, Args::new(vec![Value::Int(3)])).unwrap();
        assert_eq!(result.as_int(), Some(12));
        assert!(ctx.namespace.contains("LIB"));
        interp.release();
    }

    #[test]
    fn core_cannot_see_the_library() {
        let (_, rt) = runtime(Project {
            core_code: "x = WEBHOOKS\n".into(),
            ..Project::default()
        });
        let mut interp = Interpreter::default();
        let err = build(&rt, &mut interp).err().unwrap();
        assert!(matches!(err, EngineError::Script(_)));
    }

    #[test]
    fn params_and_texts_must_not_share_keys() {
        let (store, rt) = runtime(Project::default());
        for kind in [SettingKind::Param, SettingKind::Text] {
            store
                .insert(
                    kind.table(),
                    &Setting {
                        project_id: rt.project.id,
                        key: "GREETING".into(),
                        value: Some("hi".into()),
                        ..Setting::default()
                    },
                )
                .unwrap();
        }
        let err = build(&rt, &mut Interpreter::default()).err().unwrap();
        assert!(err.to_string().contains("same key: GREETING"));
    }

    #[test]
    fn params_assignment_persists() {
        let (store, rt) = runtime(Project::default());
        let mut interp = Interpreter::default();
        let ctx = build(&rt, &mut interp).unwrap();
        Sandbox::baseline()
            .execute(&mut interp, "PARAMS['LAST_SYNC'] = '2024-05-01'\n", &ctx.namespace)
            .unwrap();
        let stored: Vec<Setting> = store
            .fetch_all(SettingKind::Param.table(), &Query::new().eq("key", "LAST_SYNC"))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value.as_deref(), Some("2024-05-01"));
    }
}
