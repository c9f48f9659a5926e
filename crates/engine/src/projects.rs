//! Project service: validated writes, settings, secrets and lifecycle.
//!
//! Every write of `common_code` or `core_code` is validated in the sandbox
//! before it is stored, and `core_code` may only be changed by a manager.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use tether_script::{Diagnostic, Sandbox};
use tether_storage::{
    DataFile, ExternalId, Job, Link, LogRecord, Project, Property, Query, Record, RecordId,
    RecordStore, Setting, SettingKind, StoreExt, SyncOrder, Task, Trigger, TriggerKind,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::upsert::remembered_ids;

/// Who performs an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    pub is_manager: bool,
}

impl Operator {
    pub fn manager(name: &str) -> Self {
        Operator {
            name: name.to_string(),
            is_manager: true,
        }
    }

    pub fn user(name: &str) -> Self {
        Operator {
            name: name.to_string(),
            is_manager: false,
        }
    }
}

/// Fields to change on a project; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub source_url: Option<String>,
    pub source_updated_at: Option<String>,
    pub description: Option<String>,
    pub core_code: Option<String>,
    pub common_code: Option<String>,
    pub param_description: Option<String>,
    pub text_param_description: Option<String>,
    pub secret_description: Option<String>,
    pub task_description: Option<String>,
    pub data_description: Option<String>,
}

impl ProjectPatch {
    fn apply(self, p: &mut Project) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { p.$field = v; })*
            };
        }
        set!(
            name,
            active,
            description,
            core_code,
            common_code,
            param_description,
            text_param_description,
            secret_description,
            task_description,
            data_description
        );
        if let Some(url) = self.source_url {
            p.source_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(at) = self.source_updated_at {
            p.source_updated_at = Some(at);
        }
    }
}

/// Sizes shown on the project form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectCounters {
    pub task_count: usize,
    pub cron_count: usize,
    pub webhook_count: usize,
    pub automation_count: usize,
    pub order_count: usize,
    pub job_count: usize,
    pub log_count: usize,
    pub link_count: usize,
}

pub struct Projects<'a> {
    store: &'a dyn RecordStore,
    config: &'a EngineConfig,
}

fn by_project(project_id: RecordId) -> Query {
    Query::new().eq("project_id", project_id)
}

fn code_errors(label: &str, diagnostics: Vec<Diagnostic>) -> Result<(), EngineError> {
    if diagnostics.is_empty() {
        return Ok(());
    }
    let listed = diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    Err(EngineError::Validation(format!("{}:\n{}", label, listed)))
}

impl<'a> Projects<'a> {
    pub fn new(store: &'a dyn RecordStore, config: &'a EngineConfig) -> Self {
        Projects { store, config }
    }

    pub fn get(&self, id: RecordId) -> Result<Project, EngineError> {
        match self.store.get::<Project>(id) {
            Err(tether_storage::StorageError::NotFound { .. }) => {
                Err(EngineError::NotFound(format!("project {}", id)))
            }
            other => Ok(other?),
        }
    }

    fn check_patch(&self, op: &Operator, patch: &ProjectPatch) -> Result<(), EngineError> {
        if let Some(core) = &patch.core_code {
            if !op.is_manager {
                return Err(EngineError::Access(
                    "Only Administrator can update the Core Code.".into(),
                ));
            }
            code_errors(
                "Core Code is not valid",
                Sandbox::new(self.config.elevated_ruleset()).validate(core),
            )?;
        }
        if let Some(common) = &patch.common_code {
            code_errors(
                "Library Code is not valid",
                Sandbox::new(self.config.baseline_ruleset()).validate(common),
            )?;
        }
        Ok(())
    }

    pub fn create_project(&self, op: &Operator, patch: ProjectPatch) -> Result<Project, EngineError> {
        let mut patch = patch;
        if patch.core_code.as_deref() == Some("") {
            patch.core_code = None;
        }
        self.check_patch(op, &patch)?;
        let mut project = Project {
            active: true,
            ..Project::default()
        };
        patch.apply(&mut project);
        let project = self.store.add(project)?;
        info!(project_id = project.id, name = %project.name, "project created");
        Ok(project)
    }

    pub fn write_project(
        &self,
        op: &Operator,
        id: RecordId,
        patch: ProjectPatch,
    ) -> Result<Project, EngineError> {
        let mut project = self.get(id)?;
        let mut patch = patch;
        if patch.core_code.as_ref() == Some(&project.core_code) {
            patch.core_code = None;
        }
        self.check_patch(op, &patch)?;
        patch.apply(&mut project);
        self.store.save(&project)?;
        Ok(project)
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    pub fn settings(&self, kind: SettingKind, project_id: RecordId) -> Result<Vec<Setting>, EngineError> {
        Ok(self.store.fetch_all(kind.table(), &by_project(project_id))?)
    }

    pub fn setting(
        &self,
        kind: SettingKind,
        project_id: RecordId,
        key: &str,
    ) -> Result<Option<Setting>, EngineError> {
        Ok(self
            .store
            .fetch_all::<Setting>(kind.table(), &by_project(project_id).eq("key", key).limit(1))?
            .into_iter()
            .next())
    }

    /// Set a setting's value, creating it when the key is new.
    pub fn set_setting(
        &self,
        kind: SettingKind,
        project_id: RecordId,
        key: &str,
        value: Option<String>,
    ) -> Result<Setting, EngineError> {
        match self.setting(kind, project_id, key)? {
            Some(mut setting) => {
                setting.value = value;
                self.store.replace(kind.table(), setting.id, &setting)?;
                Ok(setting)
            }
            None => {
                let mut setting = Setting {
                    id: 0,
                    project_id,
                    key: key.to_string(),
                    value,
                };
                setting.id = self.store.insert(kind.table(), &setting)?;
                Ok(setting)
            }
        }
    }

    /// Write the initial value pseudo-field: it only takes effect while the
    /// stored value is empty, so re-imports never clobber operator edits.
    pub fn write_initial_value(
        &self,
        kind: SettingKind,
        setting_id: RecordId,
        initial: Option<String>,
    ) -> Result<Setting, EngineError> {
        let mut setting: Setting = self.store.fetch(kind.table(), setting_id)?;
        if setting.is_empty() {
            setting.value = initial;
            self.store.replace(kind.table(), setting.id, &setting)?;
        }
        Ok(setting)
    }

    /// A secret's value, for managers only.
    pub fn reveal_secret(&self, op: &Operator, secret_id: RecordId) -> Result<Option<String>, EngineError> {
        if !op.is_manager {
            return Err(EngineError::Access(
                "Only managers can reveal secret values.".into(),
            ));
        }
        let secret: Setting = self.store.fetch(SettingKind::Secret.table(), secret_id)?;
        info!(secret_id, key = %secret.key, operator = %op.name, "secret revealed");
        Ok(secret.value)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Duplicate the configuration of a project. The copy starts inactive.
    pub fn copy_project(&self, op: &Operator, id: RecordId) -> Result<Project, EngineError> {
        let source = self.get(id)?;
        if !source.core_code.is_empty() && !op.is_manager {
            return Err(EngineError::Access(
                "Only Administrator can copy a project with Core Code.".into(),
            ));
        }
        let copy = self.store.add(Project {
            id: 0,
            name: format!("{} (copy)", source.name),
            active: false,
            ..source.clone()
        })?;
        let mut remap: HashMap<(String, RecordId), RecordId> = HashMap::new();

        for kind in SettingKind::ALL {
            for setting in self.settings(kind, id)? {
                let new_id = self.store.insert(
                    kind.table(),
                    &Setting {
                        project_id: copy.id,
                        ..setting.clone()
                    },
                )?;
                remap.insert((kind.table().to_string(), setting.id), new_id);
            }
        }
        for data in self.store.find::<DataFile>(&by_project(id))? {
            let new = self.store.add(DataFile {
                id: 0,
                project_id: copy.id,
                ..data.clone()
            })?;
            remap.insert((DataFile::TABLE.to_string(), data.id), new.id);
        }
        let mut task_ids = HashMap::new();
        for task in self.store.find::<Task>(&by_project(id))? {
            let new = self.store.add(Task {
                id: 0,
                project_id: copy.id,
                ..task.clone()
            })?;
            task_ids.insert(task.id, new.id);
            remap.insert((Task::TABLE.to_string(), task.id), new.id);
        }
        for trigger in self.store.find::<Trigger>(&by_project(id))? {
            let Some(&task_id) = task_ids.get(&trigger.task_id) else {
                continue;
            };
            let new = self.store.add(Trigger {
                id: 0,
                project_id: copy.id,
                task_id,
                ..trigger.clone()
            })?;
            remap.insert((Trigger::TABLE.to_string(), trigger.id), new.id);
        }
        for order in self.store.find::<SyncOrder>(&by_project(id))? {
            let Some(&task_id) = task_ids.get(&order.task_id) else {
                continue;
            };
            self.store.add(SyncOrder {
                id: 0,
                project_id: copy.id,
                task_id,
                ..order
            })?;
        }

        // Keep upgrades of the copy idempotent
        for xid in self.store.find::<ExternalId>(&Query::new())? {
            let Some(name) = renamespace(&xid.name, id, copy.id, &task_ids) else {
                continue;
            };
            if let Some(&res_id) = remap.get(&(xid.table.clone(), xid.res_id)) {
                self.store.add(ExternalId {
                    id: 0,
                    name,
                    table: xid.table,
                    res_id,
                })?;
            }
        }
        info!(from = id, project_id = copy.id, "project copied");
        Ok(copy)
    }

    /// Delete a project and everything it owns.
    pub fn delete_project(&self, op: &Operator, id: RecordId) -> Result<(), EngineError> {
        let project = self.get(id)?;
        if !project.core_code.is_empty() && !op.is_manager {
            return Err(EngineError::Access(
                "Only Administrator can delete a project with Core Code.".into(),
            ));
        }
        let owned = by_project(id);
        for kind in SettingKind::ALL {
            self.delete_matching(kind.table(), &owned)?;
        }
        let task_ids: Vec<RecordId> = self.store.find::<Task>(&owned)?.iter().map(|t| t.id).collect();
        for table in [
            DataFile::TABLE,
            Trigger::TABLE,
            SyncOrder::TABLE,
            Link::TABLE,
            Job::TABLE,
            LogRecord::TABLE,
            Property::TABLE,
            Task::TABLE,
        ] {
            self.delete_matching(table, &owned)?;
        }
        let namespaces = std::iter::once(id.to_string())
            .chain(task_ids.iter().map(|t| format!("p{}t{}", id, t)));
        for namespace in namespaces {
            for xid in remembered_ids(self.store, &namespace)? {
                self.store.remove::<ExternalId>(xid.id)?;
            }
        }
        self.store.remove::<Project>(id)?;
        info!(project_id = id, "project deleted");
        Ok(())
    }

    fn delete_matching(&self, table: &str, query: &Query) -> Result<(), EngineError> {
        for row in self.store.search(table, query)? {
            self.store.delete(table, row.id)?;
        }
        Ok(())
    }

    pub fn counters(&self, id: RecordId) -> Result<ProjectCounters, EngineError> {
        let owned = by_project(id);
        let triggers = self.store.find::<Trigger>(&owned)?;
        let of_kind = |k: TriggerKind| triggers.iter().filter(|t| t.spec.kind() == k).count();
        Ok(ProjectCounters {
            task_count: self.store.count::<Task>(&owned)?,
            cron_count: of_kind(TriggerKind::Cron),
            webhook_count: of_kind(TriggerKind::Webhook),
            automation_count: of_kind(TriggerKind::Automation),
            order_count: self.store.count::<SyncOrder>(&owned)?,
            job_count: self.store.count::<Job>(&owned)?,
            log_count: self.store.count::<LogRecord>(&owned)?,
            link_count: self.store.count::<Link>(&owned)?,
        })
    }
}

/// Move an upsert key from project `from` to project `to`.
fn renamespace(
    name: &str,
    from: RecordId,
    to: RecordId,
    task_ids: &HashMap<RecordId, RecordId>,
) -> Option<String> {
    if let Some(rest) = name.strip_prefix(&format!("MAGIC__{}__", from)) {
        return Some(format!("MAGIC__{}__{}", to, rest));
    }
    let rest = name.strip_prefix(&format!("MAGIC__p{}t", from))?;
    let (task, rest) = rest.split_once("__")?;
    let new_task = task_ids.get(&task.parse().ok()?)?;
    Some(format!("MAGIC__p{}t{}__{}", to, new_task, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{install_schema, MemoryStore, TriggerSpec};

    fn setup() -> (MemoryStore, EngineConfig) {
        let store = MemoryStore::new();
        install_schema(&store).unwrap();
        (store, EngineConfig::default())
    }

    #[test]
    fn core_code_needs_a_manager() {
        let (store, config) = setup();
        let projects = Projects::new(&store, &config);
        let p = projects
            .create_project(&Operator::user("ann"), ProjectPatch::default())
            .unwrap();
        let patch = ProjectPatch {
            core_code: Some("x = 1\n".into()),
            ..ProjectPatch::default()
        };
        let err = projects
            .write_project(&Operator::user("ann"), p.id, patch.clone())
            .unwrap_err();
        assert!(matches!(err, EngineError::Access(_)));
        let p = projects
            .write_project(&Operator::manager("root"), p.id, patch)
            .unwrap();
        assert_eq!(p.core_code, "x = 1\n");
    }

    #[test]
    fn invalid_code_is_rejected_on_every_write() {
        let (store, config) = setup();
        let projects = Projects::new(&store, &config);
        let p = projects
            .create_project(&Operator::user("ann"), ProjectPatch::default())
            .unwrap();
        for bad in ["def broken(:\n", "import os\n", "x = obj._private\n"] {
            let err = projects
                .write_project(
                    &Operator::user("ann"),
                    p.id,
                    ProjectPatch {
                        common_code: Some(bad.into()),
                        ..ProjectPatch::default()
                    },
                )
                .unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{bad}: {err}");
        }
        // single-underscore attributes are fine in core code
        projects
            .write_project(
                &Operator::manager("root"),
                p.id,
                ProjectPatch {
                    core_code: Some("x = obj._private\n".into()),
                    ..ProjectPatch::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn initial_value_only_fills_empty_settings() {
        let (store, config) = setup();
        let projects = Projects::new(&store, &config);
        let empty = projects
            .set_setting(SettingKind::Param, 1, "LANG", None)
            .unwrap();
        let filled = projects
            .write_initial_value(SettingKind::Param, empty.id, Some("en".into()))
            .unwrap();
        assert_eq!(filled.value.as_deref(), Some("en"));

        projects
            .set_setting(SettingKind::Param, 1, "LANG", Some("de".into()))
            .unwrap();
        let kept = projects
            .write_initial_value(SettingKind::Param, empty.id, Some("en".into()))
            .unwrap();
        assert_eq!(kept.value.as_deref(), Some("de"));
    }

    #[test]
    fn secrets_are_revealed_to_managers_only() {
        let (store, config) = setup();
        let projects = Projects::new(&store, &config);
        let secret = projects
            .set_setting(SettingKind::Secret, 1, "TOKEN", Some("s3cr3t".into()))
            .unwrap();
        assert!(matches!(
            projects.reveal_secret(&Operator::user("ann"), secret.id),
            Err(EngineError::Access(_))
        ));
        assert_eq!(
            projects
                .reveal_secret(&Operator::manager("root"), secret.id)
                .unwrap()
                .as_deref(),
            Some("s3cr3t")
        );
    }

    fn populated(store: &MemoryStore, config: &EngineConfig) -> Project {
        let projects = Projects::new(store, config);
        let p = projects
            .create_project(
                &Operator::manager("root"),
                ProjectPatch {
                    name: Some("Telegram".into()),
                    ..ProjectPatch::default()
                },
            )
            .unwrap();
        projects
            .set_setting(SettingKind::Param, p.id, "LANG", Some("en".into()))
            .unwrap();
        let task = store
            .add(Task {
                project_id: p.id,
                name: "Setup".into(),
                ..Task::default()
            })
            .unwrap();
        store
            .add(Trigger {
                id: 0,
                project_id: p.id,
                task_id: task.id,
                trigger_name: "push".into(),
                active: true,
                spec: TriggerSpec::Webhook {
                    webhook_type: "json".into(),
                },
            })
            .unwrap();
        store
            .add(SyncOrder {
                project_id: p.id,
                task_id: task.id,
                ..SyncOrder::default()
            })
            .unwrap();
        p
    }

    #[test]
    fn copy_duplicates_configuration_and_starts_inactive() {
        let (store, config) = setup();
        let source = populated(&store, &config);
        let projects = Projects::new(&store, &config);
        let copy = projects
            .copy_project(&Operator::manager("root"), source.id)
            .unwrap();
        assert!(!copy.active);
        assert_eq!(copy.name, "Telegram (copy)");
        let counters = projects.counters(copy.id).unwrap();
        assert_eq!(counters.task_count, 1);
        assert_eq!(counters.webhook_count, 1);
        assert_eq!(counters.order_count, 1);
        assert_eq!(
            projects.settings(SettingKind::Param, copy.id).unwrap()[0].value.as_deref(),
            Some("en")
        );
    }

    #[test]
    fn delete_cascades_to_owned_rows() {
        let (store, config) = setup();
        let p = populated(&store, &config);
        let projects = Projects::new(&store, &config);
        projects.delete_project(&Operator::manager("root"), p.id).unwrap();
        assert_eq!(projects.counters(p.id).unwrap(), ProjectCounters::default());
        assert!(projects.settings(SettingKind::Param, p.id).unwrap().is_empty());
        assert!(matches!(projects.get(p.id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn delete_forgets_upsert_keys() {
        let (store, config) = setup();
        let projects = Projects::new(&store, &config);
        let p = projects
            .create_project(&Operator::user("ann"), ProjectPatch::default())
            .unwrap();
        let namespace = p.id.to_string();
        let mut values = tether_storage::Values::new();
        values.insert("project_id".into(), p.id.into());
        crate::upsert::upsert_by_code(&store, Task::TABLE, &namespace, "setup", values, None)
            .unwrap();
        assert_eq!(remembered_ids(&store, &namespace).unwrap().len(), 1);

        projects.delete_project(&Operator::user("ann"), p.id).unwrap();
        assert!(remembered_ids(&store, &namespace).unwrap().is_empty());
    }

    #[test]
    fn upsert_keys_move_to_the_copy() {
        let tasks = HashMap::from([(4, 9)]);
        assert_eq!(
            renamespace("MAGIC__1__sync_task__setup", 1, 2, &tasks).as_deref(),
            Some("MAGIC__2__sync_task__setup")
        );
        assert_eq!(
            renamespace("MAGIC__p1t4__sync_trigger__push", 1, 2, &tasks).as_deref(),
            Some("MAGIC__p2t9__sync_trigger__push")
        );
        assert_eq!(renamespace("MAGIC__3__sync_task__x", 1, 2, &tasks), None);
    }
}
