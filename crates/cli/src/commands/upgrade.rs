use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use tether_engine::{BundleSource, DirectorySource, GistSource, Operator, ProjectPatch, UreqFetch};

use super::Ctx;

fn source_for(locator: &str, http: Arc<UreqFetch>, token: Option<String>) -> Box<dyn BundleSource> {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        Box::new(GistSource::new(http, token))
    } else {
        Box::new(DirectorySource::new(None))
    }
}

pub(crate) fn cmd_upgrade(
    ctx: &Ctx,
    locator: &str,
    project: Option<u64>,
    user: &str,
    manager: bool,
) -> Result<()> {
    let (state, engine) = ctx.open()?;
    let op = if manager {
        Operator::manager(user)
    } else {
        Operator::user(user)
    };

    let project_id = match project {
        Some(id) => {
            engine.projects().write_project(
                &op,
                id,
                ProjectPatch {
                    source_url: Some(locator.to_string()),
                    ..ProjectPatch::default()
                },
            )?;
            id
        }
        None => {
            engine
                .projects()
                .create_project(
                    &op,
                    ProjectPatch {
                        source_url: Some(locator.to_string()),
                        ..ProjectPatch::default()
                    },
                )?
                .id
        }
    };

    let http = Arc::new(UreqFetch::new(engine.config().http_timeout()));
    let source = source_for(locator, http, engine.config().github_token.clone());
    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let imported = runtime
        .block_on(engine.importer().upgrade(source.as_ref(), &op, project_id))
        .with_context(|| format!("upgrade of project {} from {} failed", project_id, locator))?;

    let counters = engine.projects().counters(project_id)?;
    state.save()?;
    ctx.emit(
        &json!({
            "project": imported.id,
            "name": imported.name,
            "source_updated_at": imported.source_updated_at,
            "counters": counters,
        }),
        || {
            format!(
                "project {} \"{}\" upgraded: {} task(s), {} cron, {} webhook, {} automation trigger(s)",
                imported.id,
                imported.name,
                counters.task_count,
                counters.cron_count,
                counters.webhook_count,
                counters.automation_count
            )
        },
    )
}
