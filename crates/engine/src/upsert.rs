//! Upsert by stable synthetic key.
//!
//! Imported rows are remembered in the external id table under
//! `MAGIC__{namespace}__{table}__{code}`. Re-importing the same code updates
//! the remembered row instead of creating a new one.

use tether_storage::{ExternalId, Query, RecordId, RecordStore, StoreExt, Values};

use crate::error::EngineError;

/// Whether an upsert wrote a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created(RecordId),
    Updated(RecordId),
}

impl Upserted {
    pub fn id(self) -> RecordId {
        match self {
            Upserted::Created(id) | Upserted::Updated(id) => id,
        }
    }
}

/// Create or update the row of `table` known by (`namespace`, `code`).
///
/// When no row is remembered yet, `adopt` may name an existing row to take
/// over, e.g. a setting an operator created by hand under the same key.
pub fn upsert_by_code(
    store: &dyn RecordStore,
    table: &str,
    namespace: &str,
    code: &str,
    values: Values,
    adopt: Option<&Query>,
) -> Result<Upserted, EngineError> {
    let key = ExternalId::key(namespace, table, code);
    let remembered = store.find_one::<ExternalId>(&Query::new().eq("name", key.as_str()))?;

    if let Some(xid) = &remembered {
        if store.exists(table, xid.res_id)? {
            store.write(table, xid.res_id, values)?;
            return Ok(Upserted::Updated(xid.res_id));
        }
    }

    let adopted = match adopt {
        Some(query) => store.search(table, &query.clone().limit(1))?.into_iter().next(),
        None => None,
    };
    let result = match adopted {
        Some(row) => {
            store.write(table, row.id, values)?;
            Upserted::Updated(row.id)
        }
        None => Upserted::Created(store.create(table, values)?),
    };

    // The remembered row was deleted behind our back
    if let Some(stale) = remembered {
        store.remove::<ExternalId>(stale.id)?;
    }
    store.add(ExternalId {
        id: 0,
        name: key,
        table: table.to_string(),
        res_id: result.id(),
    })?;
    Ok(result)
}

/// Every row of `table` remembered under `namespace`.
pub fn remembered_ids(
    store: &dyn RecordStore,
    namespace: &str,
) -> Result<Vec<ExternalId>, EngineError> {
    let prefix = format!("MAGIC__{}__", namespace);
    Ok(store
        .find::<ExternalId>(&Query::new())?
        .into_iter()
        .filter(|x| x.name.starts_with(&prefix))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_storage::{install_schema, MemoryStore};

    fn values(v: serde_json::Value) -> Values {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn second_upsert_updates_the_same_row() {
        let store = MemoryStore::new();
        install_schema(&store).unwrap();
        let first = upsert_by_code(&store, "sync_task", "1", "setup", values(json!({"name": "A"})), None).unwrap();
        let second = upsert_by_code(&store, "sync_task", "1", "setup", values(json!({"name": "B"})), None).unwrap();
        assert!(matches!(first, Upserted::Created(_)));
        assert_eq!(second, Upserted::Updated(first.id()));
        assert_eq!(store.read("sync_task", first.id()).unwrap().values["name"], "B");
    }

    #[test]
    fn deleted_rows_are_recreated_and_remembered_again() {
        let store = MemoryStore::new();
        install_schema(&store).unwrap();
        let first = upsert_by_code(&store, "sync_data", "1", "data.csv", values(json!({})), None).unwrap();
        store.delete("sync_data", first.id()).unwrap();
        let second = upsert_by_code(&store, "sync_data", "1", "data.csv", values(json!({})), None).unwrap();
        assert!(matches!(second, Upserted::Created(id) if id != first.id()));
        assert_eq!(remembered_ids(&store, "1").unwrap().len(), 1);
    }

    #[test]
    fn hand_made_rows_are_adopted() {
        let store = MemoryStore::new();
        install_schema(&store).unwrap();
        let manual = store
            .create("sync_project_param", values(json!({"project_id": 1, "key": "TOKEN"})))
            .unwrap();
        let adopt = Query::new().eq("project_id", 1).eq("key", "TOKEN");
        let result = upsert_by_code(
            &store,
            "sync_project_param",
            "1",
            "PARAM_TOKEN",
            values(json!({"project_id": 1, "key": "TOKEN"})),
            Some(&adopt),
        )
        .unwrap();
        assert_eq!(result, Upserted::Updated(manual));
    }
}
