use anyhow::Result;

use tether_storage::{Link, Query, StoreExt};

use super::Ctx;

pub(crate) fn cmd_links(
    ctx: &Ctx,
    project: u64,
    relation: Option<&str>,
    reference: Option<&str>,
) -> Result<()> {
    let (state, _) = ctx.open()?;
    let mut query = Query::new().eq("project_id", project);
    if let Some(relation) = relation {
        query = query.eq("relation", relation);
    }
    let links: Vec<Link> = state
        .store
        .find::<Link>(&query)?
        .into_iter()
        .filter(|l| reference.is_none_or(|r| l.refs.values().any(|v| v == r)))
        .collect();

    ctx.emit(&links, || {
        if links.is_empty() {
            return "no links".to_string();
        }
        links
            .iter()
            .map(|l| {
                let refs = l
                    .refs
                    .iter()
                    .map(|(system, r)| format!("{}={}", system, r))
                    .collect::<Vec<_>>()
                    .join(" ");
                let record = l
                    .record
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string());
                format!("{}\t{}\t{}\t{}", l.relation, record, refs, l.sync_date)
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
