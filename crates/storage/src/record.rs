use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::query::Values;

pub type RecordId = u64;

/// A stored row: its id and field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RecordId,
    pub values: Values,
}

impl Row {
    /// Decode into a typed record, with `id` restored as a field.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, StorageError> {
        let mut values = self.values;
        values.insert("id".to_string(), self.id.into());
        Ok(serde_json::from_value(serde_json::Value::Object(values))?)
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field)
    }
}

/// A typed record living in one fixed table.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: &'static str;

    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);
}

macro_rules! record {
    ($ty:ty, $table:literal) => {
        impl Record for $ty {
            const TABLE: &'static str = $table;

            fn id(&self) -> RecordId {
                self.id
            }

            fn set_id(&mut self, id: RecordId) {
                self.id = id;
            }
        }
    };
}

/// Polymorphic reference to a host record: model tag plus id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub model: String,
    pub id: RecordId,
}

impl RecordRef {
    pub fn new(model: impl Into<String>, id: RecordId) -> Self {
        RecordRef {
            model: model.into(),
            id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.model, self.id)
    }
}

// ── Projects and configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: RecordId,
    pub name: String,
    pub active: bool,
    pub source_url: Option<String>,
    /// RFC 3339 timestamp of the fetched bundle version.
    pub source_updated_at: Option<String>,
    pub description: String,
    pub core_code: String,
    pub common_code: String,
    pub param_description: String,
    pub text_param_description: String,
    pub secret_description: String,
    pub task_description: String,
    pub data_description: String,
}
record!(Project, "sync_project");

/// The three tables holding named project values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Param,
    Text,
    Secret,
}

impl SettingKind {
    pub const ALL: [SettingKind; 3] = [SettingKind::Param, SettingKind::Text, SettingKind::Secret];

    pub fn table(self) -> &'static str {
        match self {
            SettingKind::Param => "sync_project_param",
            SettingKind::Text => "sync_project_text",
            SettingKind::Secret => "sync_project_secret",
        }
    }
}

/// A Parameter, Text Template or Secret. Which one is decided by the table
/// it is stored in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Setting {
    pub id: RecordId,
    pub project_id: RecordId,
    pub key: String,
    pub value: Option<String>,
}

impl Setting {
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFile {
    pub id: RecordId,
    pub project_id: RecordId,
    /// Technical name, e.g. `emoji` for `data.emoji.csv`.
    pub name: String,
    pub file_name: String,
    /// Base64-encoded file content.
    pub content: String,
}
record!(DataFile, "sync_data");

// ── Tasks and triggers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: RecordId,
    pub project_id: RecordId,
    pub name: String,
    pub code: String,
    /// UI button label; set only when the code defines `handle_button`.
    pub magic_button: Option<String>,
    pub sync_order_model: Option<String>,
    pub sync_order_description: Option<String>,
    pub active: bool,
}
record!(Task, "sync_task");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Cron,
    Webhook,
    Automation,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Cron => "cron",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Automation => "automation",
        }
    }
}

/// Activation rule parameters, one variant per trigger kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    Cron {
        interval_number: u32,
        interval_type: String,
    },
    Webhook {
        webhook_type: String,
    },
    Automation {
        model: String,
        trigger: String,
        filter_pre_domain: Option<String>,
        filter_domain: Option<String>,
        trigger_fields: Vec<String>,
    },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Cron { .. } => TriggerKind::Cron,
            TriggerSpec::Webhook { .. } => TriggerKind::Webhook,
            TriggerSpec::Automation { .. } => TriggerKind::Automation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub id: RecordId,
    pub project_id: RecordId,
    pub task_id: RecordId,
    pub trigger_name: String,
    pub active: bool,
    #[serde(flatten)]
    pub spec: TriggerSpec,
}
record!(Trigger, "sync_trigger");

// ── Sync orders ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    #[default]
    Draft,
    Open,
    Done,
    Cancel,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Done | OrderState::Cancel)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOrder {
    pub id: RecordId,
    pub project_id: RecordId,
    pub task_id: RecordId,
    pub name: String,
    pub body: String,
    pub record: Option<RecordRef>,
    pub state: OrderState,
}
record!(SyncOrder, "sync_order");

// ── Links ────────────────────────────────────────────────────────────────────

/// One persisted correspondence under a relation name. `record` is the
/// internal side, if any; `refs` maps external system names to references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    pub id: RecordId,
    pub project_id: RecordId,
    pub relation: String,
    pub record: Option<RecordRef>,
    pub refs: BTreeMap<String, String>,
    /// RFC 3339 timestamp of the last sync through this link.
    pub sync_date: String,
}
record!(Link, "sync_link");

// ── Jobs and logs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Enqueued,
    Started,
    Retry,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub id: RecordId,
    pub project_id: RecordId,
    pub task_id: RecordId,
    pub parent_job_id: Option<RecordId>,
    /// Entry point to call; `None` means the trigger's default handler.
    pub function: Option<String>,
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    pub trigger_name: Option<String>,
    pub queue_ref: Option<String>,
    pub state: JobState,
    pub attempts: u32,
    pub error: Option<String>,
    /// Operator the job runs on behalf of.
    pub user: String,
    pub created_at: String,
}
record!(Job, "sync_job");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<LogLevel> {
        match s {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

/// Direction of a log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    #[default]
    Server,
    DataIn,
    DataOut,
}

impl LogType {
    pub fn parse(s: &str) -> Option<LogType> {
        match s {
            "server" => Some(LogType::Server),
            "data_in" => Some(LogType::DataIn),
            "data_out" => Some(LogType::DataOut),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    pub id: RecordId,
    pub project_id: RecordId,
    pub job_id: RecordId,
    pub level: LogLevel,
    /// Source name, `Log` unless the script says otherwise.
    pub name: String,
    pub log_type: LogType,
    pub function: String,
    pub message: String,
    pub created_at: String,
}
record!(LogRecord, "sync_log");

// ── Side tables ──────────────────────────────────────────────────────────────

/// A typed value attached to a host record, scoped by project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Property {
    pub id: RecordId,
    pub project_id: RecordId,
    pub record: RecordRef,
    pub name: String,
    pub value_type: String,
    pub value: serde_json::Value,
}
record!(Property, "sync_property");

/// Stable synthetic key for upsert-by-code, `MAGIC__{namespace}__{table}__{code}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalId {
    pub id: RecordId,
    pub name: String,
    pub table: String,
    pub res_id: RecordId,
}
record!(ExternalId, "sync_external_id");

impl ExternalId {
    pub fn key(namespace: &str, table: &str, code: &str) -> String {
        format!("MAGIC__{}__{}__{}", namespace, table, code)
    }
}

/// A host model known to the platform. Host rows live in a table named
/// after the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostModel {
    pub id: RecordId,
    pub model: String,
    pub name: String,
    pub fields: Vec<String>,
}
record!(HostModel, "host_model");

/// Install the unique keys the engine relies on.
pub fn install_schema<S: crate::RecordStore + ?Sized>(store: &S) -> Result<(), StorageError> {
    for kind in SettingKind::ALL {
        store.define_unique(kind.table(), &["project_id", "key"])?;
    }
    store.define_unique(Link::TABLE, &["project_id", "relation", "record", "refs"])?;
    store.define_unique(
        Property::TABLE,
        &["project_id", "record", "name", "value_type"],
    )?;
    store.define_unique(ExternalId::TABLE, &["name"])?;
    store.define_unique(HostModel::TABLE, &["model"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::to_values;

    #[test]
    fn trigger_spec_flattens_into_kind_column() {
        let t = Trigger {
            id: 3,
            project_id: 1,
            task_id: 2,
            trigger_name: "nightly".into(),
            active: true,
            spec: TriggerSpec::Cron {
                interval_number: 1,
                interval_type: "days".into(),
            },
        };
        let values = to_values(&t).unwrap();
        assert_eq!(values["kind"], "cron");
        assert!(!values.contains_key("id"));
        let back: Trigger = Row { id: 3, values }.decode().unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn external_id_key_layout() {
        assert_eq!(
            ExternalId::key("7", "sync_task", "setup"),
            "MAGIC__7__sync_task__setup"
        );
    }
}
