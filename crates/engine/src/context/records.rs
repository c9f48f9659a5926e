//! Host records and link sets as seen by scripts.

use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{json, Value as Json};
use time::OffsetDateTime;

use tether_script::{Args, DictKey, ErrorKind, HostObject, Interpreter, ScriptError, Value};
use tether_storage::{HostModel, Link, Query, RecordRef, StorageError, StoreExt, Values};

use super::Runtime;
use crate::clock;
use crate::error::EngineError;
use crate::linker::LinkSet;
use crate::properties::PropertyType;

/// JSON tag of a record reference inside stored job arguments.
const RECORD_TAG: &str = "$record";

/// Declared fields of `model`, or `ValidationError` for an unknown model.
pub(crate) fn host_model(rt: &Runtime, model: &str) -> Result<HostModel, ScriptError> {
    rt.store
        .find_one::<HostModel>(&Query::new().eq("model", model))
        .map_err(EngineError::from)?
        .ok_or_else(|| {
            ScriptError::raised(
                ErrorKind::ValidationError,
                format!("Model {} is not available", model),
            )
        })
}

/// Row values from a script dict; unknown fields are rejected.
fn field_values(model: &HostModel, values: &Value) -> Result<Values, ScriptError> {
    let Value::Dict(d) = values else {
        return Err(ScriptError::type_error(format!(
            "values must be dict, not {}",
            values.type_name()
        )));
    };
    let mut out = Values::new();
    for (k, v) in d.borrow().iter() {
        let field = k
            .as_str()
            .ok_or_else(|| ScriptError::type_error("field names must be str"))?;
        if !model.fields.iter().any(|f| f == field) {
            return Err(ScriptError::raised(
                ErrorKind::ValidationError,
                format!("Invalid field '{}' on model '{}'", field, model.model),
            ));
        }
        out.insert(field.to_string(), v.to_json()?);
    }
    Ok(out)
}

pub(crate) fn create_record(
    rt: &Rc<Runtime>,
    model: &str,
    values: &Value,
) -> Result<Value, ScriptError> {
    let host = host_model(rt, model)?;
    let values = field_values(&host, values)?;
    let id = rt.store.create(model, values).map_err(EngineError::from)?;
    Ok(RecordHandle::value(rt, RecordRef::new(model, id)))
}

/// Host records of `model` whose fields equal the keyword arguments.
pub(crate) fn search_records(rt: &Rc<Runtime>, model: &str, args: &Args) -> Result<Value, ScriptError> {
    let host = host_model(rt, model)?;
    let mut query = Query::new();
    for (field, value) in &args.keywords {
        if field == "limit" {
            query = query.limit(value.expect_int("limit")?.max(0) as usize);
            continue;
        }
        if !host.fields.contains(field) {
            return Err(ScriptError::raised(
                ErrorKind::ValidationError,
                format!("Invalid field '{}' on model '{}'", field, model),
            ));
        }
        query = query.eq(field, value.to_json()?);
    }
    let rows = rt.store.search(model, &query).map_err(EngineError::from)?;
    Ok(Value::list(
        rows.into_iter()
            .map(|row| RecordHandle::value(rt, RecordRef::new(model, row.id)))
            .collect(),
    ))
}

// ── Record handles ───────────────────────────────────────────────────────────

pub struct RecordHandle {
    rt: Rc<Runtime>,
    record: RecordRef,
}

impl RecordHandle {
    pub fn value(rt: &Rc<Runtime>, record: RecordRef) -> Value {
        Value::host(RecordHandle {
            rt: rt.clone(),
            record,
        })
    }

    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    fn row(&self) -> Result<Values, ScriptError> {
        match self.rt.store.read(&self.record.model, self.record.id) {
            Ok(row) => Ok(row.values),
            Err(StorageError::NotFound { .. }) => Err(ScriptError::raised(
                ErrorKind::UserError,
                format!("Record {} does not exist", self.record),
            )),
            Err(e) => Err(EngineError::from(e).into()),
        }
    }

    fn set_link(&self, args: &Args) -> Result<Value, ScriptError> {
        let relation = args.required(0, "relation", "set_link")?;
        let external = args.required(1, "ref", "set_link")?;
        let sync_date = sync_date(args.optional(2, "sync_date"))?;
        let link = self.rt.linker.set_link(
            relation.expect_str("relation")?,
            &self.record,
            &reference(&external)?,
            sync_date,
            args.flag(3, "allow_many_to_many"),
        )?;
        Ok(LinkSetHandle::value(&self.rt, LinkSet::new(vec![link])))
    }

    fn search_links(&self, args: &Args) -> Result<Value, ScriptError> {
        let relation = args.required(0, "relation", "search_links")?;
        let refs = args.optional(1, "refs").map(|r| references(&r)).transpose()?;
        let set = self.rt.linker.search_links(
            relation.expect_str("relation")?,
            std::slice::from_ref(&self.record),
            refs.as_deref(),
        )?;
        Ok(LinkSetHandle::value(&self.rt, set))
    }
}

impl HostObject for RecordHandle {
    fn type_name(&self) -> &str {
        "record"
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        match name {
            "id" => return Ok(Some(Value::Int(self.record.id as i64))),
            "model" => return Ok(Some(Value::str(&self.record.model))),
            _ => {}
        }
        if self.has_method(name) {
            return Ok(None);
        }
        let row = self.row()?;
        if let Some(v) = row.get(name) {
            return Ok(Some(decode(&self.rt, v)));
        }
        let declared = host_model(&self.rt, &self.record.model)?
            .fields
            .iter()
            .any(|f| f == name);
        Ok(declared.then_some(Value::None))
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<(), ScriptError> {
        let host = host_model(&self.rt, &self.record.model)?;
        let values = field_values(
            &host,
            &Value::dict(IndexMap::from([(DictKey::from(name), value)])),
        )?;
        self.rt
            .store
            .write(&self.record.model, self.record.id, values)
            .map_err(EngineError::from)?;
        Ok(())
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(
            name,
            "write" | "exists" | "set_link" | "search_links" | "set_sync_value" | "get_sync_value"
        )
    }

    fn call_method(
        &self,
        _interp: &mut Interpreter,
        name: &str,
        args: Args,
    ) -> Result<Value, ScriptError> {
        match name {
            "write" => {
                let host = host_model(&self.rt, &self.record.model)?;
                let values = field_values(&host, &args.required(0, "values", "write")?)?;
                self.row()?;
                self.rt
                    .store
                    .write(&self.record.model, self.record.id, values)
                    .map_err(EngineError::from)?;
                Ok(Value::Bool(true))
            }
            "exists" => Ok(Value::Bool(
                self.rt
                    .store
                    .exists(&self.record.model, self.record.id)
                    .map_err(EngineError::from)?,
            )),
            "set_link" => self.set_link(&args),
            "search_links" => self.search_links(&args),
            "set_sync_value" => {
                let prop = args.required(0, "name", name)?;
                let ty: PropertyType = args.required(1, "type", name)?.expect_str("type")?.parse()?;
                let value = args.get(2, "value").cloned().unwrap_or(Value::None);
                self.rt
                    .properties
                    .set(&self.record, prop.expect_str("name")?, ty, value.to_json()?)?;
                Ok(Value::None)
            }
            "get_sync_value" => {
                let prop = args.required(0, "name", name)?;
                let ty: PropertyType = args.required(1, "type", name)?.expect_str("type")?.parse()?;
                Ok(self
                    .rt
                    .properties
                    .get(&self.record, prop.expect_str("name")?, ty)?
                    .map(|v| Value::from_json(&v))
                    .unwrap_or(Value::None))
            }
            _ => Err(ScriptError::raised(
                ErrorKind::AttributeError,
                format!("'record' object has no attribute '{}'", name),
            )),
        }
    }

    fn repr(&self) -> String {
        self.record.to_string()
    }

    fn to_json(&self) -> Option<Json> {
        Some(encode(&self.record))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn host_eq(&self, other: &dyn HostObject) -> bool {
        other
            .as_any()
            .downcast_ref::<RecordHandle>()
            .is_some_and(|o| o.record == self.record)
    }
}

/// Stored form of a record reference inside job arguments and JSON values.
pub fn encode(record: &RecordRef) -> Json {
    json!({ RECORD_TAG: { "model": record.model, "id": record.id } })
}

/// Script value of stored JSON; tagged record references become handles.
pub fn decode(rt: &Rc<Runtime>, json: &Json) -> Value {
    match json {
        Json::Object(map) => {
            if let Some(record) = map
                .get(RECORD_TAG)
                .filter(|_| map.len() == 1)
                .and_then(|r| serde_json::from_value::<RecordRef>(r.clone()).ok())
            {
                return RecordHandle::value(rt, record);
            }
            Value::dict(
                map.iter()
                    .map(|(k, v)| (DictKey::from(k.as_str()), decode(rt, v)))
                    .collect(),
            )
        }
        Json::Array(items) => Value::list(items.iter().map(|v| decode(rt, v)).collect()),
        other => Value::from_json(other),
    }
}

/// Record reference of a handle argument.
pub(crate) fn record_of(value: &Value, what: &str) -> Result<RecordRef, ScriptError> {
    value
        .as_host::<RecordHandle>()
        .map(|h| h.record.clone())
        .ok_or_else(|| {
            ScriptError::type_error(format!("{} must be a record, not {}", what, value.type_name()))
        })
}

/// An external reference: strings as they are, numbers printed.
pub(crate) fn reference(value: &Value) -> Result<String, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(_) => Ok(value.to_str()),
        other => Err(ScriptError::type_error(format!(
            "external reference must be str or int, not {}",
            other.type_name()
        ))),
    }
}

/// A single reference or a list of them.
pub(crate) fn references(value: &Value) -> Result<Vec<String>, ScriptError> {
    match value {
        Value::List(_) | Value::Tuple(_) => value.iterate()?.iter().map(reference).collect(),
        single => Ok(vec![reference(single)?]),
    }
}

pub(crate) fn sync_date(value: Option<Value>) -> Result<Option<OffsetDateTime>, ScriptError> {
    match value {
        None => Ok(None),
        Some(Value::Int(ts)) => OffsetDateTime::from_unix_timestamp(ts)
            .map(Some)
            .map_err(|e| ScriptError::value_error(e.to_string())),
        Some(Value::Str(s)) => clock::parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| ScriptError::value_error(format!("invalid sync_date '{}'", s))),
        Some(other) => Err(ScriptError::type_error(format!(
            "sync_date must be str or int, not {}",
            other.type_name()
        ))),
    }
}

// ── Link sets ────────────────────────────────────────────────────────────────

pub struct LinkSetHandle {
    rt: Rc<Runtime>,
    set: LinkSet,
}

impl LinkSetHandle {
    pub fn value(rt: &Rc<Runtime>, set: LinkSet) -> Value {
        Value::host(LinkSetHandle {
            rt: rt.clone(),
            set,
        })
    }

    fn link_value(&self, link: &Link) -> Value {
        let mut entry = IndexMap::new();
        entry.insert(DictKey::from("relation"), Value::str(&link.relation));
        entry.insert(
            DictKey::from("record"),
            link.record
                .clone()
                .map(|r| RecordHandle::value(&self.rt, r))
                .unwrap_or(Value::None),
        );
        entry.insert(
            DictKey::from("refs"),
            Value::dict(
                link.refs
                    .iter()
                    .map(|(k, v)| (DictKey::from(k.as_str()), Value::str(v)))
                    .collect(),
            ),
        );
        entry.insert(DictKey::from("sync_date"), Value::str(&link.sync_date));
        Value::dict(entry)
    }
}

fn strings(items: Vec<String>) -> Value {
    Value::list(items.into_iter().map(Value::str).collect())
}

impl HostObject for LinkSetHandle {
    fn type_name(&self) -> &str {
        "links"
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        Ok(Some(match name {
            "external" => self.set.external()?.map(Value::str).unwrap_or(Value::None),
            "externals" => strings(self.set.externals()),
            "record" => self
                .set
                .record()?
                .map(|r| RecordHandle::value(&self.rt, r))
                .unwrap_or(Value::None),
            "records" => Value::list(
                self.set
                    .records()
                    .into_iter()
                    .map(|r| RecordHandle::value(&self.rt, r))
                    .collect(),
            ),
            _ => return Ok(None),
        }))
    }

    fn has_method(&self, name: &str) -> bool {
        name == "get"
    }

    fn call_method(
        &self,
        _interp: &mut Interpreter,
        name: &str,
        args: Args,
    ) -> Result<Value, ScriptError> {
        match name {
            "get" => {
                let system = args.required(0, "system", "get")?;
                Ok(strings(self.set.get(system.expect_str("system")?)))
            }
            _ => Err(ScriptError::raised(
                ErrorKind::AttributeError,
                format!("'links' object has no attribute '{}'", name),
            )),
        }
    }

    fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        Ok(self.set.iter().map(|l| self.link_value(l)).collect())
    }

    fn len(&self) -> Option<usize> {
        Some(self.set.len())
    }

    fn repr(&self) -> String {
        format!("<links ({})>", self.set.len())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
