//! Engine configuration, read from TOML.
//!
//! ```toml
//! [storage]
//! path = "worlds/default/world.db"
//!
//! [events]
//! log_capacity = 1000
//!
//! [resolver]
//! fuzzy_threshold = 0.6
//! allow_fuzzy = true
//!
//! [modules]
//! enabled = ["core_components", "items"]
//!
//! [logging]
//! filter = "info,world_store=debug"
//! ansi = true
//! ```
//!
//! Every section and key is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::EngineResult;
use world_store::{StoreOptions, IN_MEMORY};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub events: EventsConfig,
    pub resolver: ResolverConfig,
    pub modules: ModulesConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            event_log_capacity: self.events.log_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file, or `":memory:"`.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: IN_MEMORY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Bound on the in-memory event log.
    pub log_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { log_capacity: 1000 }
    }
}

/// Settings for the entity resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum similarity (0.0-1.0) for a fuzzy match.
    pub fuzzy_threshold: f64,

    /// Whether the fuzzy stage runs at all.
    pub allow_fuzzy: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.6,
            allow_fuzzy: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Modules to load. `None` loads every registered module.
    pub enabled: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.storage.path, ":memory:");
        assert_eq!(config.events.log_capacity, 1000);
        assert_eq!(config.resolver.fuzzy_threshold, 0.6);
        assert!(config.modules.enabled.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [resolver]
            allow_fuzzy = false

            [modules]
            enabled = ["items"]
            "#,
        )
        .unwrap();
        assert!(!config.resolver.allow_fuzzy);
        assert_eq!(config.resolver.fuzzy_threshold, 0.6);
        assert_eq!(config.modules.enabled, Some(vec!["items".to_string()]));
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[events]\nlog_capacity = 5\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.store_options().event_log_capacity, 5);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[events]\nlog_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Config(_)));
    }
}
