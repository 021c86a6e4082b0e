//! Data directory layout for duraflow.
//!
//! Everything the engine writes (the SQLite database and `config.toml`)
//! lives under a single data directory.

use std::path::{Path, PathBuf};

/// Resolve the data directory.
///
/// `DURAFLOW_DATA_DIR` wins, then `~/.duraflow`, then `./.duraflow`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DURAFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    // Use home directory fallback: ~/.duraflow
    if let Some(home) = dirs::home_dir() {
        return home.join(".duraflow");
    }

    // Last resort: current directory
    PathBuf::from(".duraflow")
}

/// Create the data directory if it does not exist yet.
pub async fn ensure_data_dir(data_dir: &Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(data_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_ensure_data_dir_creates_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_data_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        // Idempotent.
        ensure_data_dir(&nested).await.unwrap();
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var("DURAFLOW_DATA_DIR", "/tmp/test-duraflow");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-duraflow"));
        unsafe {
            std::env::remove_var("DURAFLOW_DATA_DIR");
        }
    }
}
