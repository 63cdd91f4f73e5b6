//! Configuration loading

use anyhow::{Context, Result};
use hrc_core::RuleDefinitions;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Cache rules, tried in the order they are declared
    #[serde(default)]
    pub rules: RuleDefinitions,
}

/// Orchestrator settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Shared key required in `X-HRC-Control-Key` for purge and debug
    #[serde(default)]
    pub control_key: Option<String>,
    /// Purge every entry that is read
    #[serde(default)]
    pub purge_flag: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Local,
    Sqlite,
}

/// Primary store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub local: LocalStorageConfig,
}

/// Local storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    #[default]
    Filesystem,
    Sqlite,
}

/// Tag index configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default)]
    pub filesystem: FilesystemIndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemIndexConfig {
    #[serde(default = "default_index_path")]
    pub path: String,
}

impl Default for FilesystemIndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

/// Database configuration, shared by the sqlite store and index
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

fn default_local_path() -> String {
    "./data/cache".to_string()
}

fn default_index_path() -> String {
    "./data/index".to_string()
}

fn default_db_path() -> String {
    "./data/hrc.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file, falling back to defaults when the file
    /// does not exist
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Whether any backend lives in the database
    pub fn uses_database(&self) -> bool {
        self.storage.backend == StorageBackend::Sqlite || self.index.backend == IndexBackend::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrc_core::CallbackRegistry;

    const EXAMPLE: &str = r#"
[cache]
control_key = "secret"

[storage]
backend = "sqlite"

[index]
backend = "memory"

[database]
path = "/tmp/hrc-test.db"

[logging]
level = "debug"
format = "json"

[rules.Zeta]
Ttl = 60
Tags = ["z"]
Match = { Url = "/z/*" }

[rules.Alpha]
Ttl = 30
Tags = ["a", "b"]
QueryParams = ["Accept-Language"]
Match = { Url = "*", Cookie = { session = false } }
"#;

    #[test]
    fn test_parse_example() {
        let config = Config::parse(EXAMPLE).unwrap();

        assert_eq!(config.cache.control_key.as_deref(), Some("secret"));
        assert!(!config.cache.purge_flag);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.index.backend, IndexBackend::Memory);
        assert_eq!(config.database.path, "/tmp/hrc-test.db");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.uses_database());
    }

    #[test]
    fn test_rules_keep_declaration_order() {
        let config = Config::parse(EXAMPLE).unwrap();
        assert_eq!(config.rules.names().collect::<Vec<_>>(), vec!["Zeta", "Alpha"]);

        let rules = config.rules.build(&CallbackRegistry::new()).unwrap();
        assert_eq!(rules[1].ttl(), 30);
        assert!(rules[1].allowlist().is_some());
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.local.path, "./data/cache");
        assert_eq!(config.index.backend, IndexBackend::Filesystem);
        assert_eq!(config.logging.level, "info");
        assert!(config.rules.is_empty());
        assert!(!config.uses_database());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.cache.control_key, None);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::parse("[storage]\nbackend = \"s3\"").is_err());
    }
}
