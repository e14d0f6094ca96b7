//! Global configuration types for Stagegate.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! engine's timeouts and guards plus the storage location.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.stagegate/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Engine tuning knobs.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Overrides the default `sqlite://{data_dir}/stagegate.db` location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// Limits applied by the workflow engine while driving instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single condition or stage script evaluation.
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,

    /// Upper bound on waiting for an instance's lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Maximum number of step transitions taken inside one `iterate` call.
    ///
    /// Guards against cycles of automatic stages that always complete.
    #[serde(default = "default_max_transitions_per_pass")]
    pub max_transitions_per_pass: u32,
}

fn default_script_timeout_secs() -> u64 {
    30
}

fn default_lock_timeout_secs() -> u64 {
    60
}

fn default_max_transitions_per_pass() -> u32 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            script_timeout_secs: default_script_timeout_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            max_transitions_per_pass: default_max_transitions_per_pass(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.engine.script_timeout_secs, 30);
        assert_eq!(config.engine.lock_timeout_secs, 60);
        assert_eq!(config.engine.max_transitions_per_pass, 1_000);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.script_timeout_secs, 30);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_global_config_deserialize_partial_engine_section() {
        let toml_str = r#"
database_url = "sqlite:///tmp/sg.db"

[engine]
script_timeout_secs = 5
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.script_timeout_secs, 5);
        assert_eq!(config.engine.lock_timeout_secs, 60);
        assert_eq!(config.engine.max_transitions_per_pass, 1_000);
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///tmp/sg.db"));
    }
}
