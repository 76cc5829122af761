//! Database configuration.
//!
//! A configuration is a nested mapping with a `namespace`, a `driver` section
//! selecting the feature driver and a `database` section selecting the record
//! store. It can be built in code, converted from a JSON value, or loaded
//! from a `.json` / `.toml` file.
//!
//! ```toml
//! namespace = "testnamespace"
//!
//! [driver]
//! name = "color"
//! data_dir = "./data"
//! color_weight = 0.2
//!
//! [database]
//! driver = "sqlite3"
//! path = "./data/store.sqlite3"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::params::Params;
use crate::storage::SyncMode;

fn default_namespace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// What `drop_database` does when the database does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Dropping an absent database is a no-op.
    #[default]
    Lenient,
    /// Dropping an absent database fails with `NotFound`.
    Strict,
}

/// Feature driver section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registry name of the feature driver.
    pub name: String,
    /// Directory for driver state (statistics tables). Created on open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Driver-specific tuning keys.
    #[serde(flatten)]
    pub params: Params,
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_dir: None,
            params: Params::new(),
        }
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets a tuning parameter. Chainable.
    pub fn with_param<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.params.set(key, value);
        self
    }
}

/// Record store section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Registry name of the record store.
    pub driver: String,
    /// Store location: a file for `sqlite3`, a directory for `log`.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Durability of log appends.
    #[serde(default)]
    pub sync: SyncMode,
    #[serde(default)]
    pub drop_policy: DropPolicy,
    /// Create the storage schema on open when it is missing.
    #[serde(default = "default_true")]
    pub auto_create: bool,
    /// Store-specific connection parameters.
    #[serde(flatten)]
    pub params: Params,
}

impl DatabaseConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            path: None,
            sync: SyncMode::default(),
            drop_policy: DropPolicy::default(),
            auto_create: true,
            params: Params::new(),
        }
    }

    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync = mode;
        self
    }

    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    /// Returns the configured path or a configuration error naming the store.
    pub fn require_path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            Error::Configuration(format!("database driver {} requires a path", self.driver))
        })
    }
}

/// Top-level configuration.
///
/// # Example
///
/// ```
/// use pictor_core::{Config, DatabaseConfig, DriverConfig};
///
/// let config = Config::new(DriverConfig::new("color").with_param("color_weight", 0.2))
///     .with_namespace("photos")
///     .with_database(DatabaseConfig::new("memory"));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub driver: DriverConfig,
    /// Omitted means no persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
}

impl Config {
    pub fn new(driver: DriverConfig) -> Self {
        Self {
            namespace: default_namespace(),
            driver,
            database: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }

    /// Converts a nested JSON mapping into a validated config.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: Config = serde_json::from_value(value)
            .map_err(|e| Error::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a validated config from a `.json` or `.toml` file.
    ///
    /// Other extensions are parsed as JSON first, then as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let parsed = match ext.as_deref() {
            Some("json") => Self::parse_json(&content),
            Some("toml") => Self::parse_toml(&content),
            _ => Self::parse_json(&content).or_else(|_| Self::parse_toml(&content)),
        };

        let config = parsed.map_err(|e| {
            Error::Configuration(format!("cannot parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse_json(content: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    fn parse_toml(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Checks the parts of the config that do not need the driver registries.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty()
            || !self
                .namespace
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(Error::Configuration(format!(
                "namespace must match [A-Za-z0-9_]+, got {:?}",
                self.namespace
            )));
        }
        if self.driver.name.trim().is_empty() {
            return Err(Error::Configuration("driver.name is required".to_string()));
        }
        if let Some(db) = &self.database {
            if db.driver.trim().is_empty() {
                return Err(Error::Configuration("database.driver is required".to_string()));
            }
        }
        Ok(())
    }
}
