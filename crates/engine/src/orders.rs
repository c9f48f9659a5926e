//! Sync orders: tracked units of work with an explicit state machine.
//!
//! ```text
//! draft ──confirm──▶ open ──done──▶ done
//!   │                  │
//!   └──────cancel──────┴──cancel──▶ cancel
//! ```
//!
//! `done` and `cancel` are terminal. `refresh` changes nothing and leaves a
//! debug log entry.

use std::sync::Arc;

use tether_storage::{OrderState, RecordId, RecordRef, RecordStore, StoreExt, SyncOrder, Task};

use crate::error::EngineError;
use crate::jobs::JobLogger;

pub struct Orders {
    store: Arc<dyn RecordStore>,
    separate_log_transaction: bool,
}

impl Orders {
    pub fn new(store: Arc<dyn RecordStore>, separate_log_transaction: bool) -> Self {
        Orders {
            store,
            separate_log_transaction,
        }
    }

    /// A draft order for `task_id`. A referenced record must belong to the
    /// task's sync order model.
    pub fn create_order(
        &self,
        task_id: RecordId,
        name: &str,
        body: &str,
        record: Option<RecordRef>,
    ) -> Result<SyncOrder, EngineError> {
        let task: Task = self.store.get(task_id)?;
        if let Some(record) = &record {
            match task.sync_order_model.as_deref() {
                Some(model) if model == record.model => {}
                Some(model) => {
                    return Err(EngineError::Validation(format!(
                        "Task '{}' orders reference {} records, not {}",
                        task.name, model, record.model
                    )))
                }
                None => {
                    return Err(EngineError::Validation(format!(
                        "Task '{}' has no SYNC_ORDER_MODEL",
                        task.name
                    )))
                }
            }
        }
        Ok(self.store.add(SyncOrder {
            id: 0,
            project_id: task.project_id,
            task_id,
            name: name.to_string(),
            body: body.to_string(),
            record,
            state: OrderState::Draft,
        })?)
    }

    pub fn get(&self, id: RecordId) -> Result<SyncOrder, EngineError> {
        Ok(self.store.get(id)?)
    }

    fn transition(
        &self,
        id: RecordId,
        action: &str,
        allowed: impl Fn(OrderState) -> bool,
        to: OrderState,
    ) -> Result<SyncOrder, EngineError> {
        let mut order = self.get(id)?;
        if !allowed(order.state) {
            return Err(EngineError::Validation(format!(
                "Cannot {} order '{}' in state {:?}",
                action, order.name, order.state
            )));
        }
        order.state = to;
        self.store.save(&order)?;
        Ok(order)
    }

    pub fn confirm(&self, id: RecordId) -> Result<SyncOrder, EngineError> {
        self.transition(id, "confirm", |s| s == OrderState::Draft, OrderState::Open)
    }

    pub fn done(&self, id: RecordId) -> Result<SyncOrder, EngineError> {
        self.transition(id, "finish", |s| !s.is_terminal(), OrderState::Done)
    }

    pub fn cancel(&self, id: RecordId) -> Result<SyncOrder, EngineError> {
        self.transition(id, "cancel", |s| !s.is_terminal(), OrderState::Cancel)
    }

    pub fn refresh(&self, id: RecordId) -> Result<SyncOrder, EngineError> {
        let order = self.get(id)?;
        JobLogger::new(
            self.store.clone(),
            order.project_id,
            0,
            self.separate_log_transaction,
        )
        .debug(format!("Order '{}' refreshed", order.name))?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{LogRecord, MemoryStore, Query};

    fn setup() -> (Arc<MemoryStore>, Orders, Task) {
        let store = Arc::new(MemoryStore::new());
        let task = store
            .add(Task {
                project_id: 1,
                name: "Invoices".into(),
                sync_order_model: Some("account.move".into()),
                ..Task::default()
            })
            .unwrap();
        let orders = Orders::new(store.clone(), true);
        (store, orders, task)
    }

    #[test]
    fn orders_walk_the_state_machine() {
        let (_, orders, task) = setup();
        let order = orders.create_order(task.id, "March", "", None).unwrap();
        assert_eq!(order.state, OrderState::Draft);
        assert_eq!(orders.confirm(order.id).unwrap().state, OrderState::Open);
        assert!(orders.confirm(order.id).is_err());
        assert_eq!(orders.done(order.id).unwrap().state, OrderState::Done);
        assert!(matches!(orders.cancel(order.id), Err(EngineError::Validation(_))));
    }

    #[test]
    fn draft_orders_can_be_cancelled() {
        let (_, orders, task) = setup();
        let order = orders.create_order(task.id, "April", "", None).unwrap();
        assert_eq!(orders.cancel(order.id).unwrap().state, OrderState::Cancel);
    }

    #[test]
    fn record_model_must_match_the_task() {
        let (_, orders, task) = setup();
        let ok = orders
            .create_order(task.id, "A", "", Some(RecordRef::new("account.move", 3)))
            .unwrap();
        assert_eq!(ok.record, Some(RecordRef::new("account.move", 3)));
        let err = orders
            .create_order(task.id, "B", "", Some(RecordRef::new("res.partner", 3)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn refresh_only_logs() {
        let (store, orders, task) = setup();
        let order = orders.create_order(task.id, "May", "", None).unwrap();
        let refreshed = orders.refresh(order.id).unwrap();
        assert_eq!(refreshed, order);
        let logs: Vec<LogRecord> = store.find(&Query::new()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, tether_storage::LogLevel::Debug);
    }
}
