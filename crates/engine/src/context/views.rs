//! Configuration views: `SECRETS`, `PARAMS`, `WEBHOOKS`, `DATA`, and the
//! export namespaces `MAGIC`, `CORE`, `LIB`.
//!
//! Views are explicit key-value stores. Configuration values are read by
//! item (`PARAMS["TOKEN"]`, `PARAMS.get("TOKEN")`); only export namespaces
//! also answer attribute lookups, since they hold named functions.

use std::any::Any;
use std::cell::{OnceCell, RefCell};

use base64::Engine as _;
use indexmap::IndexMap;

use tether_script::{Args, DictKey, ErrorKind, HostObject, Interpreter, Namespace, ScriptError, Value};
use tether_storage::DataFile;

type OnSet = Box<dyn Fn(&str, &Value) -> Result<(), ScriptError>>;

pub struct ConfigView {
    name: String,
    entries: RefCell<IndexMap<String, Value>>,
    /// `None` makes the view read-only.
    on_set: Option<OnSet>,
    attributes: bool,
}

impl ConfigView {
    pub fn read_only(name: &str, entries: IndexMap<String, Value>) -> Self {
        ConfigView {
            name: name.to_string(),
            entries: RefCell::new(entries),
            on_set: None,
            attributes: false,
        }
    }

    /// A view whose item assignment first runs `on_set`, then updates the
    /// view itself.
    pub fn persistent(
        name: &str,
        entries: IndexMap<String, Value>,
        on_set: impl Fn(&str, &Value) -> Result<(), ScriptError> + 'static,
    ) -> Self {
        ConfigView {
            on_set: Some(Box::new(on_set)),
            ..ConfigView::read_only(name, entries)
        }
    }

    /// Read-only view over an export set, with attribute access.
    pub fn exports(name: &str, ns: &Namespace) -> Self {
        let entries = ns.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ConfigView {
            attributes: true,
            ..ConfigView::read_only(name, entries)
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    fn key(value: &Value) -> Result<String, ScriptError> {
        Ok(value.expect_str("key")?.to_string())
    }
}

impl HostObject for ConfigView {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        if !self.attributes || self.has_method(name) {
            return Ok(None);
        }
        Ok(self.get(name))
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "get" | "keys" | "values" | "items")
    }

    fn call_method(
        &self,
        _interp: &mut Interpreter,
        name: &str,
        args: Args,
    ) -> Result<Value, ScriptError> {
        let entries = self.entries.borrow();
        match name {
            "get" => {
                args.expect_at_most(2, "get")?;
                let key = Self::key(&args.required(0, "key", "get")?)?;
                Ok(entries
                    .get(&key)
                    .cloned()
                    .or_else(|| args.get(1, "default").cloned())
                    .unwrap_or(Value::None))
            }
            "keys" => Ok(Value::list(entries.keys().map(Value::str).collect())),
            "values" => Ok(Value::list(entries.values().cloned().collect())),
            "items" => Ok(Value::list(
                entries
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![Value::str(k), v.clone()]))
                    .collect(),
            )),
            _ => Err(ScriptError::raised(
                ErrorKind::AttributeError,
                format!("'{}' object has no attribute '{}'", self.name, name),
            )),
        }
    }

    fn get_item(&self, key: &Value) -> Result<Value, ScriptError> {
        let key = Self::key(key)?;
        self.get(&key)
            .ok_or_else(|| ScriptError::raised(ErrorKind::KeyError, format!("'{}'", key)))
    }

    fn set_item(&self, key: Value, value: Value) -> Result<(), ScriptError> {
        let Some(on_set) = &self.on_set else {
            return Err(ScriptError::type_error(format!(
                "'{}' does not support item assignment",
                self.name
            )));
        };
        let key = Self::key(&key)?;
        on_set(&key, &value)?;
        self.entries.borrow_mut().insert(key, value);
        Ok(())
    }

    fn contains(&self, item: &Value) -> Result<bool, ScriptError> {
        Ok(item
            .as_str()
            .is_some_and(|k| self.entries.borrow().contains_key(k)))
    }

    fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        Ok(self.entries.borrow().keys().map(Value::str).collect())
    }

    fn len(&self) -> Option<usize> {
        Some(self.entries.borrow().len())
    }

    fn repr(&self) -> String {
        format!("<{} ({} keys)>", self.name, self.entries.borrow().len())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Data files ───────────────────────────────────────────────────────────────

/// A data file, decoded and parsed only when a script asks for it.
pub struct DataHandle {
    file: DataFile,
    decoded: OnceCell<Result<String, String>>,
}

impl DataHandle {
    pub fn new(file: DataFile) -> Self {
        DataHandle {
            file,
            decoded: OnceCell::new(),
        }
    }

    /// Decoded text; `None` for an empty file.
    fn text(&self) -> Result<Option<&str>, ScriptError> {
        if self.file.content.is_empty() {
            return Ok(None);
        }
        let decoded = self.decoded.get_or_init(|| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(self.file.content.as_bytes())
                .map_err(|e| e.to_string())?;
            String::from_utf8(bytes).map_err(|e| e.to_string())
        });
        match decoded {
            Ok(text) => Ok(Some(text.as_str())),
            Err(e) => Err(ScriptError::value_error(format!(
                "cannot decode {}: {}",
                self.file.file_name, e
            ))),
        }
    }

    /// Rows keyed by the header line, like `csv.DictReader`.
    fn csv(&self) -> Result<Value, ScriptError> {
        let Some(text) = self.text()? else {
            return Ok(Value::list(Vec::new()));
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| ScriptError::value_error(e.to_string()))?
            .clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ScriptError::value_error(e.to_string()))?;
            let row: IndexMap<DictKey, Value> = headers
                .iter()
                .enumerate()
                .map(|(i, h)| (DictKey::from(h), record.get(i).map(Value::str).into()))
                .collect();
            rows.push(Value::dict(row));
        }
        Ok(Value::list(rows))
    }

    fn json(&self) -> Result<Value, ScriptError> {
        let Some(text) = self.text()? else {
            return Ok(Value::dict(IndexMap::new()));
        };
        let parsed: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ScriptError::value_error(e.to_string()))?;
        Ok(Value::from_json(&parsed))
    }

    fn yaml(&self) -> Result<Value, ScriptError> {
        let Some(text) = self.text()? else {
            return Ok(Value::None);
        };
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| ScriptError::value_error(e.to_string()))?;
        let json =
            serde_json::to_value(parsed).map_err(|e| ScriptError::value_error(e.to_string()))?;
        Ok(Value::from_json(&json))
    }
}

impl HostObject for DataHandle {
    fn type_name(&self) -> &str {
        "data"
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        Ok(match name {
            "name" => Some(Value::str(&self.file.name)),
            "file_name" => Some(Value::str(&self.file.file_name)),
            "text" => Some(self.text()?.map(Value::str).unwrap_or(Value::Bool(false))),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "csv" | "json" | "yaml")
    }

    fn call_method(
        &self,
        _interp: &mut Interpreter,
        name: &str,
        _args: Args,
    ) -> Result<Value, ScriptError> {
        match name {
            "csv" => self.csv(),
            "json" => self.json(),
            "yaml" => self.yaml(),
            _ => Err(ScriptError::raised(
                ErrorKind::AttributeError,
                format!("'data' object has no attribute '{}'", name),
            )),
        }
    }

    fn repr(&self) -> String {
        format!("<data {}>", self.file.file_name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn data(file_name: &str, text: &str) -> DataHandle {
        DataHandle::new(DataFile {
            name: "x".into(),
            file_name: file_name.into(),
            content: base64::engine::general_purpose::STANDARD.encode(text),
            ..DataFile::default()
        })
    }

    fn call(obj: &dyn HostObject, name: &str) -> Value {
        obj.call_method(&mut Interpreter::default(), name, Args::empty())
            .unwrap()
    }

    #[test]
    fn csv_rows_are_keyed_by_header() {
        let rows = call(&data("data.emoji.csv", "code,emoji\nok,👍\nno\n"), "csv");
        let json = rows.to_json().unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"code": "ok", "emoji": "👍"}, {"code": "no", "emoji": null}])
        );
    }

    #[test]
    fn json_and_yaml_parse_on_demand() {
        let json = call(&data("data.cfg.json", r#"{"a": [1, 2]}"#), "json");
        assert_eq!(json.to_json().unwrap(), serde_json::json!({"a": [1, 2]}));
        let yaml = call(&data("data.cfg.yaml", "a:\n  - 1\n  - two\n"), "yaml");
        assert_eq!(yaml.to_json().unwrap(), serde_json::json!({"a": [1, "two"]}));
    }

    #[test]
    fn empty_files_have_empty_defaults() {
        let empty = DataHandle::new(DataFile::default());
        assert_eq!(call(&empty, "csv").to_json().unwrap(), serde_json::json!([]));
        assert_eq!(call(&empty, "json").to_json().unwrap(), serde_json::json!({}));
        assert!(call(&empty, "yaml").is_none());
    }

    #[test]
    fn read_only_views_reject_assignment() {
        let view = ConfigView::read_only(
            "SECRETS",
            IndexMap::from([("TOKEN".to_string(), Value::str("x"))]),
        );
        assert_eq!(view.get_item(&Value::str("TOKEN")).unwrap().to_str(), "x");
        assert!(view.set_item(Value::str("TOKEN"), Value::str("y")).is_err());
        let missing = view.get_item(&Value::str("NOPE")).unwrap_err();
        assert_eq!(missing.kind(), Some(ErrorKind::KeyError));
        // no attribute-style access on configuration views
        assert!(view.get_attr("TOKEN").unwrap().is_none());
    }

    #[test]
    fn persistent_views_run_the_hook_then_update() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let view = ConfigView::persistent("PARAMS", IndexMap::new(), move |_, _| {
            seen.set(seen.get() + 1);
            Ok(())
        });
        view.set_item(Value::str("LANG"), Value::str("en")).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(view.get("LANG").unwrap().to_str(), "en");
    }
}
