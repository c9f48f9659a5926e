use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::json;

use tether_script::Sandbox;

use super::Ctx;
use crate::OutputFormat;

pub(crate) fn cmd_check(ctx: &Ctx, file: &Path, elevated: bool) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("could not read '{}'", file.display()))?;
    let config = ctx.engine_config()?;
    let ruleset = if elevated {
        config.elevated_ruleset()
    } else {
        config.baseline_ruleset()
    };
    let diagnostics = Sandbox::new(ruleset).validate(&source);

    if !ctx.quiet {
        match ctx.output {
            OutputFormat::Json => {
                let problems: Vec<_> = diagnostics
                    .iter()
                    .map(|d| json!({ "line": d.line, "message": d.message }))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "valid": diagnostics.is_empty(),
                        "problems": problems,
                    }))?
                );
            }
            OutputFormat::Text if diagnostics.is_empty() => println!("valid"),
            OutputFormat::Text => {
                for d in &diagnostics {
                    println!("{}:{}", file.display(), d);
                }
            }
        }
    }
    if !diagnostics.is_empty() {
        bail!("{} problem(s) found in {}", diagnostics.len(), file.display());
    }
    Ok(())
}
