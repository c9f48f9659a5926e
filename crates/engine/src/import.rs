//! Project Import Pipeline.
//!
//! Turns a [`Bundle`] into project configuration. Every row is upserted by a
//! stable code, so importing the same bundle again ("upgrade") refreshes
//! values without creating duplicates. The whole import runs in one store
//! transaction; any error rolls it back.
//!
//! | File                          | Becomes                                  |
//! |-------------------------------|------------------------------------------|
//! | `README.md`                   | project description                      |
//! | `tasks.markdown`              | task description                         |
//! | `datas.markdown`              | data description                         |
//! | `settings.markdown`           | parameters (front matter) + description  |
//! | `settings.templates.markdown` | text templates                           |
//! | `settings.secrets.markdown`   | secrets                                  |
//! | `core.py`, `library.py`       | `core_code`, `common_code`               |
//! | `data.<name>.<ext>`           | data file, fetched from its raw URL      |
//! | `task.<name>.py`              | task + triggers from its front matter    |
//! | `task.<name>.markdown`        | sync order description of that task      |

use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use tether_script::Sandbox;
use tether_storage::{
    to_values, HostModel, Project, Query, Record, RecordId, RecordStore, SettingKind, StoreExt,
    Task, Trigger, TriggerSpec,
};

use crate::bundle::{Bundle, BundleFile, BundleSource};
use crate::clock;
use crate::config::EngineConfig;
use crate::docs;
use crate::error::EngineError;
use crate::http::HttpFetch;
use crate::projects::{Operator, ProjectPatch, Projects};
use crate::upsert::{upsert_by_code, Upserted};

pub const DEFAULT_MAGIC_BUTTON: &str = "Magic ✨ Button";
pub const DEFAULT_PROJECT_NAME: &str = "Sync 🪬 Studio";

const SETTINGS_FILES: [(SettingKind, &str); 3] = [
    (SettingKind::Param, "settings.markdown"),
    (SettingKind::Text, "settings.templates.markdown"),
    (SettingKind::Secret, "settings.secrets.markdown"),
];

// ── Front matter ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
struct TaskMeta {
    title: Option<String>,
    magic_button: Option<String>,
    sync_order_model: Option<String>,
    cron: Vec<CronDecl>,
    webhook: Vec<WebhookDecl>,
    db_triggers: Vec<DbTriggerDecl>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CronDecl {
    name: String,
    #[serde(default = "CronDecl::default_number")]
    interval_number: u32,
    #[serde(default = "CronDecl::default_type")]
    interval_type: String,
    #[serde(default = "default_true")]
    active: bool,
}

impl CronDecl {
    fn default_number() -> u32 {
        1
    }

    fn default_type() -> String {
        "days".to_string()
    }
}

#[derive(Debug, Deserialize)]
struct WebhookDecl {
    name: String,
    #[serde(default = "WebhookDecl::default_type")]
    webhook_type: String,
    #[serde(default = "default_true")]
    active: bool,
}

impl WebhookDecl {
    fn default_type() -> String {
        "json".to_string()
    }
}

#[derive(Debug, Deserialize)]
struct DbTriggerDecl {
    name: String,
    model: String,
    #[serde(default = "DbTriggerDecl::default_trigger")]
    trigger: String,
    filter_pre_domain: Option<String>,
    filter_domain: Option<String>,
    /// Comma separated field names.
    trigger_fields: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
}

impl DbTriggerDecl {
    fn default_trigger() -> String {
        "on_create_or_write".to_string()
    }
}

/// `data.emoji.csv` → `emoji`, `data.a.b.json` → `a_b`.
pub fn data_technical_name(file_name: &str) -> Option<String> {
    if file_name == "data.markdown" {
        return None;
    }
    let rest = file_name.strip_prefix("data.")?;
    let stem = match rest.rfind('.') {
        Some(dot) if dot > 0 => &rest[..dot],
        _ => rest,
    };
    Some(stem.replace('.', "_"))
}

/// `task.setup.py` → `setup`.
fn task_technical_name(file_name: &str) -> Option<&str> {
    file_name.strip_prefix("task.")?.strip_suffix(".py")
}

fn yaml_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        other => serde_yaml::to_string(other)
            .ok()
            .map(|s| s.trim_end().to_string()),
    }
}

fn import_error(file: &str, message: impl Into<String>) -> EngineError {
    EngineError::Import {
        file: file.to_string(),
        message: message.into(),
    }
}

// ── Importer ─────────────────────────────────────────────────────────────────

/// Imports bundles into projects.
#[derive(Clone)]
pub struct Importer {
    store: Arc<dyn RecordStore>,
    http: Arc<dyn HttpFetch>,
    config: EngineConfig,
}

impl Importer {
    pub fn new(store: Arc<dyn RecordStore>, http: Arc<dyn HttpFetch>, config: EngineConfig) -> Self {
        Importer {
            store,
            http,
            config,
        }
    }

    fn projects(&self) -> Projects<'_> {
        Projects::new(self.store.as_ref(), &self.config)
    }

    /// "Upgrade from source": fetch the project's bundle and import it.
    pub async fn upgrade(
        &self,
        source: &dyn BundleSource,
        op: &Operator,
        project_id: RecordId,
    ) -> Result<Project, EngineError> {
        let project = self.projects().get(project_id)?;
        let Some(url) = project.source_url.clone() else {
            return Err(EngineError::User("Please provide url to the gist page".into()));
        };
        info!(project_id, %url, "upgrading project from source");
        let bundle = source.fetch(&url).await?;
        let this = self.clone();
        let op = op.clone();
        // Data downloads block
        tokio::task::spawn_blocking(move || this.import_bundle(&op, project_id, &bundle))
            .await
            .map_err(|e| EngineError::Fetch(format!("task join error: {}", e)))?
    }

    /// Import `bundle` into the project, all or nothing.
    pub fn import_bundle(
        &self,
        op: &Operator,
        project_id: RecordId,
        bundle: &Bundle,
    ) -> Result<Project, EngineError> {
        self.store.begin()?;
        match self.import_in_transaction(op, project_id, bundle) {
            Ok(project) => {
                self.store.commit()?;
                info!(project_id, files = bundle.files.len(), "bundle imported");
                Ok(project)
            }
            Err(e) => {
                self.store.rollback()?;
                Err(e)
            }
        }
    }

    fn import_in_transaction(
        &self,
        op: &Operator,
        project_id: RecordId,
        bundle: &Bundle,
    ) -> Result<Project, EngineError> {
        let project = self.projects().get(project_id)?;
        let mut patch = ProjectPatch::default();

        if project.name.is_empty() {
            patch.name = Some(
                bundle
                    .description
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            );
        }
        if let Some(updated_at) = &bundle.updated_at {
            let at = clock::parse_timestamp(updated_at)
                .ok_or_else(|| import_error("updated_at", format!("invalid timestamp '{}'", updated_at)))?;
            patch.source_updated_at = Some(clock::rfc3339(at));
        }

        let doc = |file_name: &str| match bundle.text(file_name) {
            Some(text) => docs::markdown_to_html(text),
            None => docs::missing_doc_placeholder(file_name),
        };
        patch.description = Some(doc("README.md"));
        patch.task_description = Some(doc("tasks.markdown"));
        patch.data_description = Some(doc("datas.markdown"));

        for (kind, file_name) in SETTINGS_FILES {
            let Some(text) = bundle.text(file_name) else {
                continue;
            };
            let html = Some(docs::markdown_to_html(text));
            match kind {
                SettingKind::Param => patch.param_description = html,
                SettingKind::Text => patch.text_param_description = html,
                SettingKind::Secret => patch.secret_description = html,
            }
            self.import_settings(project_id, kind, file_name, text)?;
        }

        patch.core_code = bundle.text("core.py").map(str::to_string);
        patch.common_code = bundle.text("library.py").map(str::to_string);

        for file in bundle.files.values() {
            if let Some(name) = data_technical_name(&file.filename) {
                self.import_data(project_id, &name, file)?;
            }
        }
        for (file_name, file) in &bundle.files {
            if let Some(name) = task_technical_name(file_name) {
                let description = bundle.text(&format!("task.{}.markdown", name));
                self.import_task(project_id, name, file_name, &file.content, description)?;
            }
        }

        self.projects().write_project(op, project_id, patch)
    }

    fn import_settings(
        &self,
        project_id: RecordId,
        kind: SettingKind,
        file_name: &str,
        text: &str,
    ) -> Result<(), EngineError> {
        let meta = docs::markdown_front_matter(text).map_err(|e| import_error(file_name, e.to_string()))?;
        let serde_yaml::Value::Mapping(entries) = meta else {
            return Err(import_error(file_name, "front matter must be a mapping"));
        };
        let namespace = project_id.to_string();
        for (key, initial) in entries {
            let key = yaml_text(&key).ok_or_else(|| import_error(file_name, "empty key"))?;
            let values = json!({"project_id": project_id, "key": key});
            let adopt = Query::new().eq("project_id", project_id).eq("key", key.as_str());
            let upserted = upsert_by_code(
                self.store.as_ref(),
                kind.table(),
                &namespace,
                &format!("PARAM_{}", key),
                values.as_object().cloned().unwrap_or_default(),
                Some(&adopt),
            )?;
            self.projects()
                .write_initial_value(kind, upserted.id(), yaml_text(&initial))?;
        }
        debug!(project_id, file = file_name, "settings imported");
        Ok(())
    }

    fn import_data(&self, project_id: RecordId, name: &str, file: &BundleFile) -> Result<(), EngineError> {
        let bytes = match &file.raw_url {
            Some(url) => {
                let response = self.http.get(url, &[])?;
                if response.status != 200 {
                    return Err(import_error(
                        &file.filename,
                        format!(
                            "Failed to fetch raw content from {}. Status code: {}",
                            url, response.status
                        ),
                    ));
                }
                response.body
            }
            None => file.content.clone().into_bytes(),
        };
        let values = json!({
            "project_id": project_id,
            "name": name,
            "file_name": file.filename,
            "content": base64::engine::general_purpose::STANDARD.encode(bytes),
        });
        upsert_by_code(
            self.store.as_ref(),
            tether_storage::DataFile::TABLE,
            &project_id.to_string(),
            &file.filename,
            values.as_object().cloned().unwrap_or_default(),
            None,
        )?;
        debug!(project_id, file = %file.filename, "data file imported");
        Ok(())
    }

    fn host_model(&self, model: &str) -> Result<HostModel, EngineError> {
        self.store
            .find_one::<HostModel>(&Query::new().eq("model", model))?
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "Model {} is not available. Check if you need to install an extra module first.",
                    model
                ))
            })
    }

    fn import_task(
        &self,
        project_id: RecordId,
        name: &str,
        file_name: &str,
        content: &str,
        description: Option<&str>,
    ) -> Result<(), EngineError> {
        let meta = docs::script_front_matter(content).map_err(|e| import_error(file_name, e.to_string()))?;
        let meta: TaskMeta = serde_yaml::from_value(meta)
            .map_err(|e| import_error(file_name, format!("Error parsing YAML: {}", e)))?;
        let code = docs::front_matter_to_comments(content);

        let diagnostics = Sandbox::new(self.config.baseline_ruleset()).validate(&code);
        if !diagnostics.is_empty() {
            let listed = diagnostics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(import_error(
                file_name,
                format!("Invalid python code at file {}:\n\n{}", file_name, listed),
            ));
        }

        let magic_button = docs::defines_function(&code, "handle_button").then(|| {
            meta.magic_button
                .clone()
                .unwrap_or_else(|| DEFAULT_MAGIC_BUTTON.to_string())
        });
        let sync_order_model = match &meta.sync_order_model {
            Some(model) => Some(self.host_model(model)?.model),
            None => None,
        };
        let task = Task {
            id: 0,
            project_id,
            name: meta
                .title
                .clone()
                .unwrap_or_else(|| format!("<No TITLE found at the {}>", file_name)),
            code,
            magic_button,
            sync_order_model,
            sync_order_description: description.map(docs::markdown_to_html),
            active: true,
        };
        let task_id = upsert_by_code(
            self.store.as_ref(),
            Task::TABLE,
            &project_id.to_string(),
            name,
            to_values(&task)?,
            None,
        )?
        .id();

        let trigger_ns = format!("p{}t{}", project_id, task_id);
        let upsert_trigger = |trigger_name: &str,
                              active: bool,
                              spec: TriggerSpec|
         -> Result<Upserted, EngineError> {
            let trigger = Trigger {
                id: 0,
                project_id,
                task_id,
                trigger_name: trigger_name.to_string(),
                active,
                spec,
            };
            upsert_by_code(
                self.store.as_ref(),
                Trigger::TABLE,
                &trigger_ns,
                trigger_name,
                to_values(&trigger)?,
                None,
            )
        };

        for cron in &meta.cron {
            upsert_trigger(
                &cron.name,
                cron.active,
                TriggerSpec::Cron {
                    interval_number: cron.interval_number,
                    interval_type: cron.interval_type.clone(),
                },
            )?;
        }
        for hook in &meta.webhook {
            upsert_trigger(
                &hook.name,
                hook.active,
                TriggerSpec::Webhook {
                    webhook_type: hook.webhook_type.clone(),
                },
            )?;
        }
        for db in &meta.db_triggers {
            let model = self.host_model(&db.model)?;
            let trigger_fields = db
                .trigger_fields
                .as_deref()
                .map(|fields| {
                    fields
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(|f| {
                            if model.fields.iter().any(|known| known == f) {
                                Ok(f.to_string())
                            } else {
                                Err(EngineError::Validation(format!(
                                    "Field {} is not found in model {}",
                                    f, model.model
                                )))
                            }
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?
                .unwrap_or_default();
            let task_domain = |domain: &Option<String>| {
                domain
                    .as_ref()
                    .map(|d| d.replace("{TASK_ID}", &task_id.to_string()))
            };
            upsert_trigger(
                &db.name,
                db.active,
                TriggerSpec::Automation {
                    model: model.model.clone(),
                    trigger: db.trigger.clone(),
                    filter_pre_domain: task_domain(&db.filter_pre_domain),
                    filter_domain: task_domain(&db.filter_domain),
                    trigger_fields,
                },
            )?;
        }
        debug!(project_id, task_id, file = file_name, "task imported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_names_drop_prefix_and_extension() {
        assert_eq!(data_technical_name("data.emoji.csv").as_deref(), Some("emoji"));
        assert_eq!(data_technical_name("data.a.b.json").as_deref(), Some("a_b"));
        assert_eq!(data_technical_name("data.markdown"), None);
        assert_eq!(data_technical_name("README.md"), None);
    }

    #[test]
    fn task_names_come_from_the_file_name() {
        assert_eq!(task_technical_name("task.setup.py"), Some("setup"));
        assert_eq!(task_technical_name("task.setup.markdown"), None);
        assert_eq!(task_technical_name("core.py"), None);
    }

    #[test]
    fn front_matter_keys_are_screaming_snake_case() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            "TITLE: Setup\nCRON:\n  - name: nightly\nDB_TRIGGERS:\n  - name: on_partner\n    model: res.partner\n",
        )
        .unwrap();
        let meta: TaskMeta = serde_yaml::from_value(yaml).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Setup"));
        assert_eq!(meta.cron[0].interval_type, "days");
        assert_eq!(meta.db_triggers[0].trigger, "on_create_or_write");
        assert!(meta.webhook.is_empty());
    }

    #[test]
    fn yaml_scalars_become_text() {
        assert_eq!(yaml_text(&serde_yaml::Value::from(42)), Some("42".into()));
        assert_eq!(yaml_text(&serde_yaml::Value::Null), None);
        assert_eq!(yaml_text(&serde_yaml::Value::from("x")), Some("x".into()));
    }
}
