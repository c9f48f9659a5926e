use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::query::{lookup, Query, Values};
use crate::record::{RecordId, Row};
use crate::traits::RecordStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Table {
    next_id: RecordId,
    rows: BTreeMap<RecordId, Values>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables(HashMap<String, Table>);

impl Tables {
    fn table(&self, name: &str) -> Option<&Table> {
        self.0.get(name)
    }

    fn table_mut(&mut self, name: &str) -> &mut Table {
        self.0.entry(name.to_string()).or_default()
    }
}

struct Transaction {
    snapshot: Tables,
    autonomous: Vec<(String, RecordId, Values)>,
}

#[derive(Default)]
struct Inner {
    tables: Tables,
    unique: HashMap<String, Vec<Vec<String>>>,
    tx: Option<Transaction>,
}

impl Inner {
    fn check_unique(
        &self,
        table: &str,
        id: RecordId,
        values: &Values,
    ) -> Result<(), StorageError> {
        let (Some(sets), Some(rows)) = (self.unique.get(table), self.tables.table(table)) else {
            return Ok(());
        };
        for fields in sets {
            let key: Vec<_> = fields.iter().map(|f| lookup(values, f)).collect();
            let clash = rows.rows.iter().any(|(other_id, other)| {
                *other_id != id
                    && fields
                        .iter()
                        .zip(&key)
                        .all(|(f, v)| lookup(other, f) == *v)
            });
            if clash {
                return Err(StorageError::UniqueViolation {
                    table: table.to_string(),
                    fields: fields.join(", "),
                });
            }
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, mut values: Values) -> Result<RecordId, StorageError> {
        values.remove("id");
        let id = self
            .tables
            .table(table)
            .map_or(1, |t| t.next_id.max(1));
        self.check_unique(table, id, &values)?;
        let t = self.tables.table_mut(table);
        t.rows.insert(id, values);
        t.next_id = id + 1;
        Ok(id)
    }
}

/// In-memory reference backend.
///
/// A transaction snapshots every table on `begin`; `rollback` restores the
/// snapshot and then replays the autonomous inserts made since. The whole
/// store can be saved to and restored from JSON.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Serialize every table. Fails while a transaction is open.
    pub fn to_json(&self) -> Result<serde_json::Value, StorageError> {
        let inner = self.inner.lock();
        if inner.tx.is_some() {
            return Err(StorageError::TransactionActive);
        }
        Ok(serde_json::to_value(&inner.tables)?)
    }

    /// Rebuild a store from [`to_json`](Self::to_json) output. Unique keys
    /// are not part of the dump and must be defined again.
    pub fn from_json(json: serde_json::Value) -> Result<Self, StorageError> {
        let tables: Tables = serde_json::from_value(json)?;
        Ok(MemoryStore {
            inner: Mutex::new(Inner {
                tables,
                ..Inner::default()
            }),
        })
    }
}

impl RecordStore for MemoryStore {
    fn define_unique(&self, table: &str, fields: &[&str]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let sets = inner.unique.entry(table.to_string()).or_default();
        if !sets.contains(&fields) {
            sets.push(fields);
        }
        Ok(())
    }

    fn create(&self, table: &str, values: Values) -> Result<RecordId, StorageError> {
        self.inner.lock().insert(table, values)
    }

    fn create_autonomous(&self, table: &str, values: Values) -> Result<RecordId, StorageError> {
        let mut inner = self.inner.lock();
        let id = inner.insert(table, values)?;
        if inner.tx.is_some() {
            let stored = inner.tables.table_mut(table).rows[&id].clone();
            if let Some(tx) = inner.tx.as_mut() {
                tx.autonomous.push((table.to_string(), id, stored));
            }
        }
        Ok(id)
    }

    fn read(&self, table: &str, id: RecordId) -> Result<Row, StorageError> {
        let inner = self.inner.lock();
        inner
            .tables
            .table(table)
            .and_then(|t| t.rows.get(&id))
            .map(|values| Row {
                id,
                values: values.clone(),
            })
            .ok_or_else(|| StorageError::NotFound {
                table: table.to_string(),
                id,
            })
    }

    fn write(&self, table: &str, id: RecordId, values: Values) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let mut merged = inner
            .tables
            .table(table)
            .and_then(|t| t.rows.get(&id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                table: table.to_string(),
                id,
            })?;
        for (k, v) in values {
            if k != "id" {
                merged.insert(k, v);
            }
        }
        inner.check_unique(table, id, &merged)?;
        inner.tables.table_mut(table).rows.insert(id, merged);
        Ok(())
    }

    fn delete(&self, table: &str, id: RecordId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        match inner.tables.table_mut(table).rows.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                table: table.to_string(),
                id,
            }),
        }
    }

    fn search(&self, table: &str, query: &Query) -> Result<Vec<Row>, StorageError> {
        let inner = self.inner.lock();
        let Some(t) = inner.tables.table(table) else {
            return Ok(Vec::new());
        };
        let matches = t
            .rows
            .iter()
            .filter(|(_, values)| query.matches(values))
            .map(|(id, values)| Row {
                id: *id,
                values: values.clone(),
            });
        Ok(match query.limit {
            Some(n) => matches.take(n).collect(),
            None => matches.collect(),
        })
    }

    fn begin(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.tx.is_some() {
            return Err(StorageError::TransactionActive);
        }
        let snapshot = inner.tables.clone();
        inner.tx = Some(Transaction {
            snapshot,
            autonomous: Vec::new(),
        });
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        match inner.tx.take() {
            Some(_) => Ok(()),
            None => Err(StorageError::NoTransaction),
        }
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let tx = inner.tx.take().ok_or(StorageError::NoTransaction)?;
        inner.tables = tx.snapshot;
        for (table, id, values) in tx.autonomous {
            let t = inner.tables.table_mut(&table);
            t.rows.insert(id, values);
            t.next_id = t.next_id.max(id + 1);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.inner.lock().tx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;
    use serde_json::json;

    fn values(v: serde_json::Value) -> Values {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn memory_store_passes_conformance() {
        let report = run_conformance_suite(MemoryStore::new);
        assert!(report.failed == 0, "{report}");
    }

    #[test]
    fn json_dump_round_trips_rows_and_ids() {
        let store = MemoryStore::new();
        store.create("t", values(json!({"a": 1}))).unwrap();
        store.create("t", values(json!({"a": 2}))).unwrap();
        store.delete("t", 2).unwrap();

        let restored = MemoryStore::from_json(store.to_json().unwrap()).unwrap();
        assert_eq!(restored.read("t", 1).unwrap().values["a"], 1);
        let next = restored.create("t", values(json!({"a": 3}))).unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn dump_is_refused_mid_transaction() {
        let store = MemoryStore::new();
        store.begin().unwrap();
        assert!(matches!(
            store.to_json(),
            Err(StorageError::TransactionActive)
        ));
    }
}
