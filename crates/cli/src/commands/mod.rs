pub(crate) mod check;
pub(crate) mod links;
pub(crate) mod model;
pub(crate) mod order;
pub(crate) mod run;
pub(crate) mod secret;
pub(crate) mod upgrade;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use tether_engine::{Engine, EngineConfig, MemoryQueue, UreqFetch};

use crate::state::StateFile;
use crate::OutputFormat;

/// Global options every command sees.
pub(crate) struct Ctx {
    pub output: OutputFormat,
    pub quiet: bool,
    pub config: PathBuf,
    pub state: PathBuf,
}

impl Ctx {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig::load(&self.config)?.from_env_overrides()?)
    }

    /// The state file plus an engine over it.
    pub fn open(&self) -> Result<(StateFile, Engine)> {
        let config = self.engine_config()?;
        let state = StateFile::open(&self.state)?;
        let timeout = config.http_timeout();
        let engine = Engine::new(
            state.store.clone(),
            Arc::new(UreqFetch::new(timeout)),
            Arc::new(MemoryQueue::new()),
            config,
        )
        .with_import_fetch(Arc::new(UreqFetch::new(timeout).with_local_files()));
        Ok((state, engine))
    }

    /// Print `value` as pretty JSON, or `text` otherwise.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        match self.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", text()),
        }
        Ok(())
    }
}
