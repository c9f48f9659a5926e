//! Jobs: the queue collaborator and the job log sink.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tether_storage::{to_values, LogLevel, LogRecord, LogType, Record, RecordId, RecordStore};

use crate::clock;
use crate::error::EngineError;

// ── Queue ────────────────────────────────────────────────────────────────────

/// Options a script may pass to `add_job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueOptions {
    /// Lower runs first.
    pub priority: i64,
    pub description: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        EnqueueOptions {
            priority: 10,
            description: None,
        }
    }
}

/// The asynchronous job queue. The engine stores the job row itself; the
/// queue only schedules job ids.
pub trait JobQueue: Send + Sync {
    /// Schedule `job_id` and return the queue's own reference for it.
    fn enqueue(&self, job_id: RecordId, options: &EnqueueOptions) -> Result<String, EngineError>;

    /// The next job to run, if any.
    fn dequeue(&self) -> Option<RecordId>;

    fn pending(&self) -> usize;
}

/// In-process queue ordered by priority, then arrival.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    seq: u64,
    entries: VecDeque<(i64, u64, RecordId)>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        MemoryQueue::default()
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, job_id: RecordId, options: &EnqueueOptions) -> Result<String, EngineError> {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        let at = inner
            .entries
            .iter()
            .position(|(p, s, _)| (*p, *s) > (options.priority, seq))
            .unwrap_or(inner.entries.len());
        inner.entries.insert(at, (options.priority, seq, job_id));
        Ok(format!("memory-{}", seq))
    }

    fn dequeue(&self) -> Option<RecordId> {
        self.inner.lock().entries.pop_front().map(|(_, _, id)| id)
    }

    fn pending(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

// ── Log sink ─────────────────────────────────────────────────────────────────

/// One job log line before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub name: String,
    pub log_type: LogType,
    pub function: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        LogEntry {
            level,
            name: "Log".to_string(),
            log_type: LogType::Server,
            function: String::new(),
            message: message.into(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn log_type(mut self, log_type: LogType) -> Self {
        self.log_type = log_type;
        self
    }

    pub fn function(mut self, function: &str) -> Self {
        self.function = function.to_string();
        self
    }
}

/// Persists log entries of one job and mirrors them to `tracing`.
///
/// With `separate_transaction` every entry is an autonomous write, so it
/// survives a rollback of the job's transaction.
#[derive(Clone)]
pub struct JobLogger {
    store: Arc<dyn RecordStore>,
    project_id: RecordId,
    job_id: RecordId,
    separate_transaction: bool,
}

impl JobLogger {
    pub fn new(
        store: Arc<dyn RecordStore>,
        project_id: RecordId,
        job_id: RecordId,
        separate_transaction: bool,
    ) -> Self {
        JobLogger {
            store,
            project_id,
            job_id,
            separate_transaction,
        }
    }

    pub fn log(&self, entry: LogEntry) -> Result<RecordId, EngineError> {
        let (project_id, job_id) = (self.project_id, self.job_id);
        let LogEntry {
            level,
            name,
            log_type,
            function,
            message,
        } = entry;
        match level {
            LogLevel::Debug => debug!(project_id, job_id, %name, %function, "{}", message),
            LogLevel::Info => info!(project_id, job_id, %name, %function, "{}", message),
            LogLevel::Warning => warn!(project_id, job_id, %name, %function, "{}", message),
            LogLevel::Error | LogLevel::Critical => {
                error!(project_id, job_id, %name, %function, level = level.as_str(), "{}", message)
            }
        }
        let values = to_values(&LogRecord {
            id: 0,
            project_id,
            job_id,
            level,
            name,
            log_type,
            function,
            message,
            created_at: clock::now_rfc3339(),
        })?;
        let id = if self.separate_transaction {
            self.store.create_autonomous(LogRecord::TABLE, values)?
        } else {
            self.store.create(LogRecord::TABLE, values)?
        };
        Ok(id)
    }

    pub fn info(&self, message: impl Into<String>) -> Result<RecordId, EngineError> {
        self.log(LogEntry::new(LogLevel::Info, message))
    }

    pub fn debug(&self, message: impl Into<String>) -> Result<RecordId, EngineError> {
        self.log(LogEntry::new(LogLevel::Debug, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{MemoryStore, Query, StoreExt};

    #[test]
    fn queue_orders_by_priority_then_arrival() {
        let queue = MemoryQueue::new();
        let low = EnqueueOptions {
            priority: 20,
            ..EnqueueOptions::default()
        };
        queue.enqueue(1, &low).unwrap();
        queue.enqueue(2, &EnqueueOptions::default()).unwrap();
        queue.enqueue(3, &EnqueueOptions::default()).unwrap();
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn separate_transaction_logs_survive_rollback() {
        let store = Arc::new(MemoryStore::new());
        let logger = JobLogger::new(store.clone(), 1, 7, true);
        store.begin().unwrap();
        logger.info("kept").unwrap();
        store.rollback().unwrap();
        let logs: Vec<LogRecord> = store.find(&Query::new()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, "Log");
        assert_eq!(logs[0].job_id, 7);
    }

    #[test]
    fn shared_transaction_logs_roll_back_with_the_job() {
        let store = Arc::new(MemoryStore::new());
        let logger = JobLogger::new(store.clone(), 1, 7, false);
        store.begin().unwrap();
        logger
            .log(
                LogEntry::new(LogLevel::Warning, "gone")
                    .name("Telegram")
                    .log_type(LogType::DataOut),
            )
            .unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count::<LogRecord>(&Query::new()).unwrap(), 0);
    }
}
