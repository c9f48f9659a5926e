use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::query::{Query, Values};
use crate::record::{Record, RecordId, Row};

/// The storage collaborator contract for Tether.
///
/// A `RecordStore` holds rows of JSON field values in named tables. Each
/// table assigns its own ascending ids. Typed access goes through
/// [`StoreExt`], which every store gets for free.
///
/// ## Transactions
///
/// A store has at most one open transaction at a time:
///
/// 1. `begin()` starts it
/// 2. reads and writes see the transaction's own changes
/// 3. `commit()` keeps every change, `rollback()` discards them
///
/// Writes made through [`create_autonomous`](RecordStore::create_autonomous)
/// survive a rollback of the surrounding transaction. Job logs use this so
/// that entries written before a failure are kept.
///
/// ## Unique keys
///
/// `define_unique` registers a field set that no two rows of a table may
/// share. Violations surface as [`StorageError::UniqueViolation`], which is
/// how conflicting concurrent creation is detected.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` so one store can be shared by the
/// job runner and its workers.
pub trait RecordStore: Send + Sync {
    // ── Schema ───────────────────────────────────────────────────────────────

    /// Register a unique field set for `table`. Idempotent.
    fn define_unique(&self, table: &str, fields: &[&str]) -> Result<(), StorageError>;

    // ── Rows ─────────────────────────────────────────────────────────────────

    /// Insert a row and return its new id. Any `id` key in `values` is ignored.
    fn create(&self, table: &str, values: Values) -> Result<RecordId, StorageError>;

    /// Insert a row that is kept even if the open transaction rolls back.
    fn create_autonomous(&self, table: &str, values: Values) -> Result<RecordId, StorageError>;

    /// Read one row. Returns `Err(StorageError::NotFound)` if absent.
    fn read(&self, table: &str, id: RecordId) -> Result<Row, StorageError>;

    /// Merge `values` into an existing row.
    fn write(&self, table: &str, id: RecordId, values: Values) -> Result<(), StorageError>;

    /// Delete one row. Returns `Err(StorageError::NotFound)` if absent.
    fn delete(&self, table: &str, id: RecordId) -> Result<(), StorageError>;

    /// Every row matching `query`, ordered by id.
    fn search(&self, table: &str, query: &Query) -> Result<Vec<Row>, StorageError>;

    /// Whether a row with this id exists.
    fn exists(&self, table: &str, id: RecordId) -> Result<bool, StorageError> {
        match self.read(table, id) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ── Transactions ─────────────────────────────────────────────────────────

    fn begin(&self) -> Result<(), StorageError>;

    fn commit(&self) -> Result<(), StorageError>;

    fn rollback(&self) -> Result<(), StorageError>;

    fn in_transaction(&self) -> bool;
}

/// Typed helpers over any [`RecordStore`].
pub trait StoreExt: RecordStore {
    /// Read a row of `table` as `T`.
    fn fetch<T: DeserializeOwned>(&self, table: &str, id: RecordId) -> Result<T, StorageError> {
        self.read(table, id)?.decode()
    }

    /// Every row of `table` matching `query`, decoded as `T`.
    fn fetch_all<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<T>, StorageError> {
        self.search(table, query)?
            .into_iter()
            .map(Row::decode)
            .collect()
    }

    /// Serialize `value` and insert it into `table`.
    fn insert<T: Serialize>(&self, table: &str, value: &T) -> Result<RecordId, StorageError> {
        self.create(table, to_values(value)?)
    }

    /// Serialize `value` over the existing row `id`.
    fn replace<T: Serialize>(&self, table: &str, id: RecordId, value: &T) -> Result<(), StorageError> {
        self.write(table, id, to_values(value)?)
    }

    fn get<R: Record>(&self, id: RecordId) -> Result<R, StorageError> {
        self.fetch(R::TABLE, id)
    }

    fn find<R: Record>(&self, query: &Query) -> Result<Vec<R>, StorageError> {
        self.fetch_all(R::TABLE, query)
    }

    /// The first match, if any.
    fn find_one<R: Record>(&self, query: &Query) -> Result<Option<R>, StorageError> {
        Ok(self.find(&query.clone().limit(1))?.into_iter().next())
    }

    /// Insert `record` and return it with its assigned id.
    fn add<R: Record>(&self, mut record: R) -> Result<R, StorageError> {
        let id = self.insert(R::TABLE, &record)?;
        record.set_id(id);
        Ok(record)
    }

    /// Write every field of `record` back to its row.
    fn save<R: Record>(&self, record: &R) -> Result<(), StorageError> {
        self.replace(R::TABLE, record.id(), record)
    }

    fn remove<R: Record>(&self, id: RecordId) -> Result<(), StorageError> {
        self.delete(R::TABLE, id)
    }

    fn count<R: Record>(&self, query: &Query) -> Result<usize, StorageError> {
        Ok(self.search(R::TABLE, query)?.len())
    }
}

impl<S: RecordStore + ?Sized> StoreExt for S {}

/// Serialize a typed record into row values, dropping its `id`.
pub fn to_values<T: Serialize>(value: &T) -> Result<Values, StorageError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(StorageError::Serialization(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}
