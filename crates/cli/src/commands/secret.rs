use anyhow::Result;
use serde_json::json;

use tether_engine::Operator;

use super::Ctx;

pub(crate) fn cmd_secret(ctx: &Ctx, id: u64, user: &str, manager: bool) -> Result<()> {
    let (_, engine) = ctx.open()?;
    let op = if manager {
        Operator::manager(user)
    } else {
        Operator::user(user)
    };
    let value = engine.projects().reveal_secret(&op, id)?;
    ctx.emit(&json!({ "id": id, "value": value }), || {
        value.clone().unwrap_or_default()
    })
}
