//! Orchestrator configuration: loaded from `.mission/config.json`, with
//! environment-variable overrides for the values operators need to flip
//! without editing a committed file. Each setting has its own named
//! override rather than one monolithic env dump.

use crate::model::ModelRates;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_audit_ring_capacity() -> usize {
    1000
}

fn default_subscriber_queue_capacity() -> usize {
    256
}

fn default_scope_exemptions() -> Vec<String> {
    vec![".mission/".to_string(), "go.mod".to_string(), "Makefile".to_string()]
}

fn default_model_rate() -> ModelRates {
    ModelRates {
        input_per_token: 0.000_003,
        output_per_token: 0.000_015,
    }
}

/// Mission-wide configuration, serialized at `.mission/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_audit_ring_capacity")]
    pub audit_ring_capacity: usize,
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    #[serde(default = "default_scope_exemptions")]
    pub scope_exemptions: Vec<String>,
    /// Per-model USD rates. Looked up by worker's `model` field; falls back
    /// to `default_rate` when a model has no entry (Open Question 1:
    /// configurable, not hardcoded).
    #[serde(default)]
    pub model_rates: HashMap<String, ModelRates>,
    #[serde(default = "default_model_rate")]
    pub default_rate: ModelRates,
    /// Bearer token required on the subscriber protocol. Empty string (the
    /// default) means open/development mode.
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub mission_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            audit_ring_capacity: default_audit_ring_capacity(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            scope_exemptions: default_scope_exemptions(),
            model_rates: HashMap::new(),
            default_rate: default_model_rate(),
            api_token: String::new(),
            mission_dir: PathBuf::from(".mission"),
        }
    }
}

impl Config {
    /// Load `.mission/config.json` under `mission_dir`, falling back to
    /// defaults if the file is absent, then apply environment overrides.
    pub fn load(mission_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mission_dir = mission_dir.as_ref();
        let config_path = mission_dir.join("config.json");
        let mut config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&raw)?
        } else {
            Config::default()
        };
        config.mission_dir = mission_dir.to_path_buf();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("MC_API_TOKEN") {
            self.api_token = token;
        }
        if let Ok(dir) = std::env::var("MC_MISSION_DIR") {
            self.mission_dir = PathBuf::from(dir);
        }
    }

    pub fn model_rate(&self, model: &str) -> ModelRates {
        self.model_rates.get(model).copied().unwrap_or(self.default_rate)
    }

    pub fn auth_required(&self) -> bool {
        !self.api_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_auth_required() {
        let cfg = Config::default();
        assert!(!cfg.auth_required());
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let cfg = Config::default();
        let rate = cfg.model_rate("unknown-model");
        assert_eq!(rate.input_per_token, cfg.default_rate.input_per_token);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.audit_ring_capacity, 1000);
    }
}
