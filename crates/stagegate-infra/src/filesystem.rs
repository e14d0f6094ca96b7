//! Data directory layout.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STAGEGATE_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STAGEGATE_DATA_DIR` environment variable
/// 2. `~/.stagegate`
/// 3. `./.stagegate` when no home directory is known
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stagegate");
    }

    PathBuf::from(".stagegate")
}

/// Path of the configuration file inside `data_dir`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Create `data_dir` if needed.
pub async fn ensure_data_dir(data_dir: &Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(data_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-stagegate");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-stagegate"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }

    #[test]
    fn test_config_path() {
        assert_eq!(
            config_path(Path::new("/home/user/.stagegate")),
            PathBuf::from("/home/user/.stagegate/config.toml")
        );
    }

    #[tokio::test]
    async fn test_ensure_data_dir_creates_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        ensure_data_dir(&nested).await.unwrap();
        ensure_data_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
