use anyhow::{bail, Context, Result};
use clap::Subcommand;

use tether_engine::Operator;
use tether_storage::{JobState, RecordRef, StoreExt, Trigger, TriggerSpec};

use super::Ctx;

#[derive(Subcommand)]
pub(crate) enum RunTarget {
    /// Press a task's button (handle_button)
    Button {
        /// Task id
        task: u64,
    },
    /// Fire a cron trigger (handle_cron)
    Cron {
        /// Trigger id
        trigger: u64,
    },
    /// Fire a webhook trigger with a JSON payload (handle_webhook)
    Webhook {
        /// Trigger id
        trigger: u64,
        /// JSON payload; an empty object when omitted
        #[arg(long)]
        payload: Option<String>,
    },
    /// Fire an automation trigger for changed host records (handle_db)
    Records {
        /// Trigger id
        trigger: u64,
        /// Ids of the changed records of the trigger's model
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

pub(crate) fn cmd_run(ctx: &Ctx, target: RunTarget, user: &str) -> Result<()> {
    let (state, engine) = ctx.open()?;
    let op = Operator::user(user);

    match target {
        RunTarget::Button { task } => engine.press_button(&op, task)?,
        RunTarget::Cron { trigger } => engine.fire(&op, trigger, None)?,
        RunTarget::Webhook { trigger, payload } => {
            let payload: serde_json::Value = match payload {
                Some(text) => serde_json::from_str(&text).context("payload is not valid JSON")?,
                None => serde_json::json!({}),
            };
            engine.fire(&op, trigger, Some(payload))?
        }
        RunTarget::Records { trigger, ids } => {
            let found: Trigger = state.store.get(trigger)?;
            let TriggerSpec::Automation { model, .. } = &found.spec else {
                bail!("trigger {} is not an automation trigger", trigger);
            };
            let records: Vec<RecordRef> = ids.iter().map(|id| RecordRef::new(model, *id)).collect();
            engine.fire_automation(&op, trigger, &records)?
        }
    };

    let jobs = engine.run_pending()?;
    state.save()?;

    ctx.emit(&jobs, || {
        jobs.iter()
            .map(|j| {
                let mut line = format!(
                    "job {} {}: {:?}",
                    j.id,
                    j.function.as_deref().unwrap_or("handle_button"),
                    j.state
                );
                if let Some(error) = &j.error {
                    line.push_str(&format!(" ({})", error));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    if let Some(failed) = jobs.iter().find(|j| j.state == JobState::Failed) {
        bail!(
            "job {} failed: {}",
            failed.id,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
