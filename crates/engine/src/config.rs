//! Engine configuration.
//!
//! Loaded from a TOML file, then overridden by `TETHER_*` environment
//! variables. Every key is optional.
//!
//! # Example
//!
//! ```toml
//! separate_log_transaction = true
//! webhook_base_url = "https://erp.example.com"
//! http_timeout_secs = 42
//! max_retries = 5
//! baseline_max_steps = 10000000
//! baseline_max_depth = 64
//! elevated_max_depth = 256
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_script::{Ruleset, BASELINE_MAX_STEPS};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Write job logs outside the job's transaction so they survive a rollback.
    pub separate_log_transaction: bool,
    /// Prefix of generated webhook URLs.
    pub webhook_base_url: String,
    pub http_timeout_secs: u64,
    /// How many times a job raising `RetryableJobError` is attempted in total.
    pub max_retries: u32,
    pub baseline_max_steps: u64,
    /// `None` runs core code without a step budget.
    pub elevated_max_steps: Option<u64>,
    pub baseline_max_depth: usize,
    pub elevated_max_depth: usize,
    /// Sent as a bearer token when fetching gists.
    pub github_token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            separate_log_transaction: true,
            webhook_base_url: "http://localhost:8069".to_string(),
            http_timeout_secs: 42,
            max_retries: 5,
            baseline_max_steps: BASELINE_MAX_STEPS,
            elevated_max_steps: None,
            baseline_max_depth: 64,
            elevated_max_depth: 256,
            github_token: None,
        }
    }
}

impl EngineConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("could not read '{}': {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("could not parse '{}': {}", path.display(), e))
        })
    }

    /// Apply `TETHER_*` variables from the process environment.
    pub fn from_env_overrides(self) -> Result<Self, EngineError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable source.
    pub fn with_overrides(
        mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EngineError> {
        if let Some(v) = var("TETHER_SEPARATE_LOG_TRANSACTION") {
            self.separate_log_transaction = parse_bool("TETHER_SEPARATE_LOG_TRANSACTION", &v)?;
        }
        if let Some(v) = var("TETHER_WEBHOOK_BASE_URL") {
            self.webhook_base_url = v;
        }
        if let Some(v) = var("TETHER_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_num("TETHER_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("TETHER_MAX_RETRIES") {
            self.max_retries = parse_num("TETHER_MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("TETHER_BASELINE_MAX_STEPS") {
            self.baseline_max_steps = parse_num("TETHER_BASELINE_MAX_STEPS", &v)?;
        }
        if let Some(v) = var("TETHER_ELEVATED_MAX_STEPS") {
            self.elevated_max_steps = match v.as_str() {
                "" | "none" => None,
                n => Some(parse_num("TETHER_ELEVATED_MAX_STEPS", n)?),
            };
        }
        if let Some(v) = var("TETHER_GITHUB_TOKEN") {
            self.github_token = Some(v).filter(|t| !t.is_empty());
        }
        Ok(self)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Ruleset for library and task code.
    pub fn baseline_ruleset(&self) -> Ruleset {
        Ruleset::baseline()
            .with_max_steps(Some(self.baseline_max_steps))
            .with_max_depth(self.baseline_max_depth)
    }

    /// Ruleset for core code.
    pub fn elevated_ruleset(&self) -> Ruleset {
        Ruleset::elevated()
            .with_max_steps(self.elevated_max_steps)
            .with_max_depth(self.elevated_max_depth)
    }

    pub fn webhook_url(&self, project_id: u64, trigger_name: &str) -> String {
        format!(
            "{}/sync/webhook/{}/{}",
            self.webhook_base_url.trim_end_matches('/'),
            project_id,
            trigger_name
        )
    }
}

fn parse_bool(key: &str, v: &str) -> Result<bool, EngineError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EngineError::Config(format!("{} must be a boolean, got '{}'", key, v))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, EngineError> {
    v.trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{} must be a number, got '{}'", key, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::load(&dir.path().join("tether.toml")).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert!(cfg.separate_log_transaction);
    }

    #[test]
    fn toml_keys_are_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "max_retries = 2\nwebhook_base_url = \"https://erp.test/\"\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.http_timeout_secs, 42);
        assert_eq!(cfg.webhook_url(3, "push"), "https://erp.test/sync/webhook/3/push");
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "max_retries = \"many\"\n").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(EngineError::Config(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars = HashMap::from([
            ("TETHER_SEPARATE_LOG_TRANSACTION", "false"),
            ("TETHER_ELEVATED_MAX_STEPS", "500"),
            ("TETHER_GITHUB_TOKEN", "ghp_x"),
        ]);
        let cfg = EngineConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(!cfg.separate_log_transaction);
        assert_eq!(cfg.elevated_max_steps, Some(500));
        assert_eq!(cfg.elevated_ruleset().limits.max_steps, Some(500));
        assert_eq!(cfg.github_token.as_deref(), Some("ghp_x"));
    }

    #[test]
    fn malformed_override_is_rejected() {
        let err = EngineConfig::default()
            .with_overrides(|k| (k == "TETHER_MAX_RETRIES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TETHER_MAX_RETRIES"));
    }
}
