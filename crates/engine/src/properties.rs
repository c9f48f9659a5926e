//! Per-record property side table.
//!
//! Open-ended typed values attached to any host record, scoped by project.
//! A property is identified by (project, record, name, type); the same name
//! may hold one value per type.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value as Json;

use tether_storage::{Property, Query, RecordId, RecordRef, RecordStore, StoreExt};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Char,
    Text,
    Boolean,
    Integer,
    Float,
    Json,
}

impl PropertyType {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyType::Char => "char",
            PropertyType::Text => "text",
            PropertyType::Boolean => "boolean",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Json => "json",
        }
    }

    /// Whether `value` can be stored under this type. `null` fits every type.
    pub fn accepts(self, value: &Json) -> bool {
        match (self, value) {
            (_, Json::Null) | (PropertyType::Json, _) => true,
            (PropertyType::Char | PropertyType::Text, Json::String(_)) => true,
            (PropertyType::Boolean, Json::Bool(_)) => true,
            (PropertyType::Integer, Json::Number(n)) => n.is_i64() || n.is_u64(),
            (PropertyType::Float, Json::Number(_)) => true,
            _ => false,
        }
    }
}

impl FromStr for PropertyType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "char" => PropertyType::Char,
            "text" => PropertyType::Text,
            "boolean" => PropertyType::Boolean,
            "integer" => PropertyType::Integer,
            "float" => PropertyType::Float,
            "json" => PropertyType::Json,
            other => {
                return Err(EngineError::Validation(format!(
                    "unknown property type '{}'",
                    other
                )))
            }
        })
    }
}

pub struct Properties {
    store: Arc<dyn RecordStore>,
    project_id: RecordId,
}

impl Properties {
    pub fn new(store: Arc<dyn RecordStore>, project_id: RecordId) -> Self {
        Properties { store, project_id }
    }

    fn query(&self, record: &RecordRef, name: &str, ty: PropertyType) -> Result<Query, EngineError> {
        Ok(Query::new()
            .eq("project_id", self.project_id)
            .eq(
                "record",
                serde_json::to_value(record).map_err(tether_storage::StorageError::from)?,
            )
            .eq("name", name)
            .eq("value_type", ty.as_str()))
    }

    pub fn set(
        &self,
        record: &RecordRef,
        name: &str,
        ty: PropertyType,
        value: Json,
    ) -> Result<(), EngineError> {
        if !ty.accepts(&value) {
            return Err(EngineError::Validation(format!(
                "property '{}' of type {} cannot hold {}",
                name,
                ty.as_str(),
                value
            )));
        }
        match self.store.find_one::<Property>(&self.query(record, name, ty)?)? {
            Some(mut existing) => {
                existing.value = value;
                self.store.save(&existing)?;
            }
            None => {
                self.store.add(Property {
                    id: 0,
                    project_id: self.project_id,
                    record: record.clone(),
                    name: name.to_string(),
                    value_type: ty.as_str().to_string(),
                    value,
                })?;
            }
        }
        Ok(())
    }

    /// The stored value, `None` when the property was never set.
    pub fn get(
        &self,
        record: &RecordRef,
        name: &str,
        ty: PropertyType,
    ) -> Result<Option<Json>, EngineError> {
        Ok(self
            .store
            .find_one::<Property>(&self.query(record, name, ty)?)?
            .map(|p| p.value))
    }
}
