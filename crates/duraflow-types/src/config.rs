//! Engine configuration types for duraflow.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls the
//! scheduler cadence, attempt concurrency and storage location.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
///
/// Loaded from `~/.duraflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fixed delay between scheduler ticks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How many different executions one tick may attempt at once.
    #[serde(default = "default_max_concurrent_attempts")]
    pub max_concurrent_attempts: usize,

    /// SQLite file name inside the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Bridge tracing spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub enable_otel: bool,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_concurrent_attempts() -> usize {
    1
}

fn default_database_file() -> String {
    "duraflow.db".to_string()
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_attempts: default_max_concurrent_attempts(),
            database_file: default_database_file(),
            enable_otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_concurrent_attempts, 1);
        assert_eq!(config.database_file, "duraflow.db");
        assert!(!config.enable_otel);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
poll_interval_ms = 250
max_concurrent_attempts = 4
database_file = "engine.db"
enable_otel = true
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_concurrent_attempts, 4);
        assert_eq!(config.database_file, "engine.db");
        assert!(config.enable_otel);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = EngineConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
