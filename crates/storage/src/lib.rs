pub mod conformance;
mod error;
mod memory;
mod query;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use query::{lookup, Condition, Query, Values};
pub use record::{
    install_schema, DataFile, ExternalId, HostModel, Job, JobState, Link, LogLevel, LogRecord,
    LogType, OrderState, Project, Property, Record, RecordId, RecordRef, Row, Setting,
    SettingKind, SyncOrder, Task, Trigger, TriggerKind, TriggerSpec,
};
pub use traits::{to_values, RecordStore, StoreExt};
