//! Runtime configuration (spec §6): environment variables layered over an
//! optional `.foundry.toml`, following the usual env-var-plus-TOML-file
//! layering applied to Foundry's own knob set.

use serde::{Deserialize, Serialize};

use crate::dispatcher::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundryConfig {
    pub cli_provider_priority: Vec<String>,
    pub helper_deterministic_enabled: bool,
    pub helper_deterministic_percent: u8,
    pub helper_deterministic_max_files: usize,
    pub helper_deterministic_max_bytes: u64,
    pub helper_deterministic_max_bytes_per_file: u64,
    pub helper_agent_mode: Option<String>,
    pub circuit_breaker_ttl_seconds: u64,
    pub session_error_threshold: u32,
    pub state_key: String,
    pub queue_name: String,
    pub redis_url: String,
}

impl Default for FoundryConfig {
    fn default() -> Self {
        FoundryConfig {
            cli_provider_priority: Provider::default_priority()
                .iter()
                .map(|p| p.name().to_string())
                .collect(),
            helper_deterministic_enabled: true,
            helper_deterministic_percent: 25,
            helper_deterministic_max_files: 50,
            helper_deterministic_max_bytes: 10 * 1024 * 1024,
            helper_deterministic_max_bytes_per_file: 256 * 1024,
            helper_agent_mode: None,
            circuit_breaker_ttl_seconds: 24 * 60 * 60,
            session_error_threshold: 3,
            state_key: "supervisor:state".to_string(),
            queue_name: "tasks".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl FoundryConfig {
    /// Loads `.foundry.toml` if present, then overlays recognized
    /// environment variables (spec §6) on top of it.
    pub fn load(toml_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = match toml_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => FoundryConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CLI_PROVIDER_PRIORITY") {
            self.cli_provider_priority = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("HELPER_DETERMINISTIC_ENABLED") {
            if let Ok(parsed) = v.parse() {
                self.helper_deterministic_enabled = parsed;
            }
        }
        if let Ok(v) = std::env::var("HELPER_DETERMINISTIC_PERCENT") {
            if let Ok(parsed) = v.parse() {
                self.helper_deterministic_percent = parsed;
            }
        }
        if let Ok(v) = std::env::var("HELPER_DETERMINISTIC_MAX_FILES") {
            if let Ok(parsed) = v.parse() {
                self.helper_deterministic_max_files = parsed;
            }
        }
        if let Ok(v) = std::env::var("HELPER_DETERMINISTIC_MAX_BYTES") {
            if let Ok(parsed) = v.parse() {
                self.helper_deterministic_max_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("HELPER_DETERMINISTIC_MAX_BYTES_PER_FILE") {
            if let Ok(parsed) = v.parse() {
                self.helper_deterministic_max_bytes_per_file = parsed;
            }
        }
        if let Ok(v) = std::env::var("HELPER_AGENT_MODE") {
            self.helper_agent_mode = Some(v);
        }
        if let Ok(v) = std::env::var("CIRCUIT_BREAKER_TTL_SECONDS") {
            if let Ok(parsed) = v.parse() {
                self.circuit_breaker_ttl_seconds = parsed;
            }
        }
    }

    pub fn provider_priority(&self) -> Vec<Provider> {
        self.cli_provider_priority
            .iter()
            .filter_map(|name| Provider::from_name(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_matches_spec_example_order() {
        let config = FoundryConfig::default();
        assert_eq!(
            config.cli_provider_priority,
            vec!["GEMINI", "COPILOT", "CURSOR", "CODEX", "CLAUDE", "OLLAMA"]
        );
    }

    #[test]
    fn provider_priority_filters_unknown_names() {
        let mut config = FoundryConfig::default();
        config.cli_provider_priority = vec!["GEMINI".into(), "BOGUS".into(), "CLAUDE".into()];
        let priority = config.provider_priority();
        assert_eq!(priority.len(), 2);
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let config = FoundryConfig::load(None).unwrap();
        assert_eq!(config.queue_name, "tasks");
    }
}
