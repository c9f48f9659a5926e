/// All errors that can be returned by a RecordStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No row with the given id exists in the table.
    #[error("record not found: {table}/{id}")]
    NotFound { table: String, id: u64 },

    /// A write would give two rows the same values for a unique field set.
    #[error("unique constraint violated on {table} ({fields})")]
    UniqueViolation { table: String, fields: String },

    /// `commit` or `rollback` was called with no open transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// `begin` was called while a transaction was already open.
    #[error("a transaction is already in progress")]
    TransactionActive,

    /// A row could not be converted to or from its typed record.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    /// A backend-specific storage error (connection, I/O, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
