//! Global configuration loader for Stagegate.
//!
//! Reads `config.toml` from the data directory (`~/.stagegate/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::Path;

use stagegate_types::config::GlobalConfig;

use crate::filesystem::config_path;
use crate::sqlite::pool::default_database_url;

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GlobalConfig::default()
        }
    }
}

/// The configured database URL, or the default one inside `data_dir`.
pub fn resolve_database_url(config: &GlobalConfig, data_dir: &Path) -> String {
    match config.database_url.as_deref() {
        Some(url) if !url.trim().is_empty() => url.to_string(),
        _ => default_database_url(data_dir),
    }
}
