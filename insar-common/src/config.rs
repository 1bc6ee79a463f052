//! Configuration loading
//!
//! Every setting is resolved in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error; a malformed one is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Database file override
pub const ENV_DATABASE: &str = "INSAR_DATABASE";
/// Experiment tracker base URL
pub const ENV_TRACKING_URI: &str = "MLFLOW_TRACKING_URI";
/// Experiment name runs are filed under
pub const ENV_EXPERIMENT: &str = "MLFLOW_EXPERIMENT";
/// Default log filter when RUST_LOG is unset
pub const ENV_LOG_LEVEL: &str = "INSAR_LOG_LEVEL";

pub const DEFAULT_EXPERIMENT: &str = "insar_assignment";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_TRACKING_TIMEOUT_SECS: u64 = 10;

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    pub database: Option<PathBuf>,
    pub max_connections: Option<u32>,
    pub log_level: Option<String>,
    pub tracking: TomlTracking,
}

/// `[tracking]` table of `config.toml`
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TomlTracking {
    pub uri: Option<String>,
    pub experiment: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl TomlConfig {
    /// Parse a config file that must exist
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    /// Load the explicit file if given, else the platform default if present
    pub fn load_optional(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub tracking_uri: Option<String>,
    pub experiment: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub log_level: String,
    pub tracking: TrackingSettings,
}

/// Experiment tracker settings; `uri == None` disables tracking
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub uri: Option<String>,
    pub experiment: String,
    pub timeout_secs: u64,
}

impl Settings {
    /// Resolve settings from the process environment and config file
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let toml_config = TomlConfig::load_optional(cli.config.as_deref())?;
        Self::from_sources(cli, &toml_config, |key| std::env::var(key).ok())
    }

    /// Resolve settings from explicit sources
    pub fn from_sources<E>(cli: &CliOverrides, toml_config: &TomlConfig, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let database_path = cli
            .database
            .clone()
            .or_else(|| env(ENV_DATABASE).map(PathBuf::from))
            .or_else(|| toml_config.database.clone())
            .unwrap_or_else(default_database_path);

        let max_connections = toml_config
            .max_connections
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }

        let log_level = cli
            .log_level
            .clone()
            .or_else(|| env(ENV_LOG_LEVEL))
            .or_else(|| toml_config.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let uri = cli
            .tracking_uri
            .clone()
            .or_else(|| env(ENV_TRACKING_URI))
            .or_else(|| toml_config.tracking.uri.clone());

        let experiment = cli
            .experiment
            .clone()
            .or_else(|| env(ENV_EXPERIMENT))
            .or_else(|| toml_config.tracking.experiment.clone())
            .unwrap_or_else(|| DEFAULT_EXPERIMENT.to_string());

        Ok(Self {
            database_path,
            max_connections,
            log_level,
            tracking: TrackingSettings {
                uri: uri.and_then(normalize_tracking_uri),
                experiment,
                timeout_secs: toml_config
                    .tracking
                    .timeout_secs
                    .unwrap_or(DEFAULT_TRACKING_TIMEOUT_SECS),
            },
        })
    }
}

/// Empty, `off` and `none` all mean "tracking disabled"
fn normalize_tracking_uri(uri: String) -> Option<String> {
    let trimmed = uri.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "off" | "none" => None,
        _ => Some(trimmed.trim_end_matches('/').to_string()),
    }
}

/// `<config_dir>/insar/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("insar").join("config.toml"))
}

/// `<data_local_dir>/insar/insar.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("insar").join("insar.db"))
        .unwrap_or_else(|| PathBuf::from("./insar_data/insar.db"))
}
