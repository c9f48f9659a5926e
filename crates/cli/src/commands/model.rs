use anyhow::Result;

use tether_storage::{HostModel, Query, StoreExt};

use super::Ctx;

pub(crate) fn cmd_model(ctx: &Ctx, model: &str, fields: &str, name: Option<&str>) -> Result<()> {
    let (state, _) = ctx.open()?;
    let store = state.store.as_ref();
    let fields: Vec<String> = fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    let host = match store.find_one::<HostModel>(&Query::new().eq("model", model))? {
        Some(mut existing) => {
            existing.fields = fields;
            if let Some(name) = name {
                existing.name = name.to_string();
            }
            store.save(&existing)?;
            existing
        }
        None => store.add(HostModel {
            id: 0,
            model: model.to_string(),
            name: name.unwrap_or(model).to_string(),
            fields,
        })?,
    };
    state.save()?;
    ctx.emit(&host, || {
        format!("model {} ({} fields)", host.model, host.fields.len())
    })
}
