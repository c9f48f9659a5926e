//! The JSON state file: a whole [`MemoryStore`] dumped after each command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use tether_storage::{install_schema, MemoryStore};

pub(crate) struct StateFile {
    path: PathBuf,
    pub store: Arc<MemoryStore>,
}

impl StateFile {
    /// Open `path`, or start empty when it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let store = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("could not read state file '{}'", path.display()))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("invalid JSON in state file '{}'", path.display()))?;
            MemoryStore::from_json(json)?
        } else {
            MemoryStore::new()
        };
        // Unique keys are not part of the dump
        install_schema(&store)?;
        debug!(path = %path.display(), "state loaded");
        Ok(StateFile {
            path: path.to_path_buf(),
            store: Arc::new(store),
        })
    }

    pub fn save(&self) -> Result<()> {
        let json = self.store.to_json()?;
        let text = serde_json::to_string_pretty(&json)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("could not write state file '{}'", self.path.display()))?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }
}
