//! Bootstrap configuration
//!
//! Configuration is a single TOML file. Every setting has a built-in default,
//! so a missing file is not fatal: the service starts with defaults and
//! reports where its configuration came from once logging is up.
//!
//! # Config File Resolution Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`ATLAS_CONFIG`)
//! 3. Platform config directory (`~/.config/atlas/config.toml` on Linux)
//! 4. Built-in defaults (no file)

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "ATLAS_CONFIG";

/// Root configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Read path settings
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Outer bound for one query, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
}

/// Title search client settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SearchConfig {
    /// Base URL of the external title index (search disabled when absent)
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Ingestion worker settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Number of broker partitions, one worker each
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Sleep between polls of an idle partition
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a received message stays invisible before redelivery
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,

    /// Delay before a nacked message becomes visible again
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound of the index refresh retry backoff
    #[serde(default = "default_refresh_max_backoff_ms")]
    pub refresh_max_backoff_ms: u64,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("atlas"))
        .unwrap_or_else(|| PathBuf::from("./atlas_data"))
        .join("atlas.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_query_timeout_ms() -> u64 {
    2000
}

fn default_partitions() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_refresh_max_backoff_ms() -> u64 {
    30_000
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            refresh_max_backoff_ms: default_refresh_max_backoff_ms(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            query: QueryConfig::default(),
            search: SearchConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// Where [`TomlConfig::load_or_default`] found its settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// This file was named but does not exist; defaults in use
    Missing(PathBuf),
    /// No file named or found; defaults in use
    Defaults,
}

impl ConfigSource {
    /// Whether the built-in defaults are in use
    pub fn is_default(&self) -> bool {
        !matches!(self, ConfigSource::File(_))
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Missing(path) => write!(f, "built-in defaults ({} not found)", path.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file and load it, falling back to defaults
    ///
    /// A file that exists but does not parse is an error; a file that does
    /// not exist yields defaults. Runs before logging is initialized, so the
    /// caller reports the returned [`ConfigSource`].
    pub fn load_or_default(cli_arg: Option<&Path>) -> Result<(Self, ConfigSource)> {
        match resolve_config_path(cli_arg) {
            Some(path) if path.exists() => {
                let config = Self::load(&path)?;
                Ok((config, ConfigSource::File(path)))
            }
            Some(path) => Ok((Self::default(), ConfigSource::Missing(path))),
            None => Ok((Self::default(), ConfigSource::Defaults)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ingest.partitions == 0 {
            return Err(Error::Config("ingest.partitions must be at least 1".to_string()));
        }
        if self.query.timeout_ms == 0 {
            return Err(Error::Config("query.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Locate the config file following the priority order above
///
/// Returns `None` when neither an explicit path nor a platform file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("atlas").join("config.toml"))
        .filter(|p| p.exists())
}
