use anyhow::Result;
use clap::Subcommand;

use tether_storage::{RecordRef, StoreExt, Task};

use super::Ctx;

#[derive(Subcommand)]
pub(crate) enum OrderCommand {
    /// Create a draft order for a task
    Create {
        /// Task id
        task: u64,
        /// Order name
        #[arg(long)]
        name: String,
        /// Order body
        #[arg(long, default_value = "")]
        body: String,
        /// Referenced host record id, of the task's SYNC_ORDER_MODEL
        #[arg(long)]
        record: Option<u64>,
    },
    /// draft → open
    Confirm { id: u64 },
    /// → done
    Done { id: u64 },
    /// → cancel
    Cancel { id: u64 },
    /// Leave the order as it is and log a refresh
    Refresh { id: u64 },
}

pub(crate) fn cmd_order(ctx: &Ctx, command: OrderCommand) -> Result<()> {
    let (state, engine) = ctx.open()?;
    let orders = engine.orders();

    let order = match command {
        OrderCommand::Create {
            task,
            name,
            body,
            record,
        } => {
            let record = match record {
                Some(id) => {
                    let task: Task = state.store.get(task)?;
                    let model = task.sync_order_model.unwrap_or_default();
                    Some(RecordRef::new(model, id))
                }
                None => None,
            };
            orders.create_order(task, &name, &body, record)?
        }
        OrderCommand::Confirm { id } => orders.confirm(id)?,
        OrderCommand::Done { id } => orders.done(id)?,
        OrderCommand::Cancel { id } => orders.cancel(id)?,
        OrderCommand::Refresh { id } => orders.refresh(id)?,
    };
    state.save()?;
    ctx.emit(&order, || {
        format!("order {} \"{}\": {:?}", order.id, order.name, order.state)
    })
}
