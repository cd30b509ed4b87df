//! Configuration loading from file and environment variables.

use std::path::Path;

use recc_db::{ConnectionTarget, PoolLimits};
use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Connection target, including the command timeout and the maintenance
    /// database used to create and drop the target.
    #[serde(default)]
    pub database: ConnectionTarget,

    /// Pool sizing and recycling.
    #[serde(default)]
    pub pool: PoolLimits,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "recc_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults when the
/// file does not exist, then applies environment overrides.
///
/// Environment variable overrides:
/// - `RECC_DB_HOST` overrides `database.host`
/// - `RECC_DB_PORT` overrides `database.port`
/// - `RECC_DB_USER` overrides `database.user`
/// - `RECC_DB_PASSWORD` overrides `database.password`
/// - `RECC_DB_NAME` overrides `database.database`
/// - `RECC_LOG_LEVEL` overrides `logging.level`
/// - `RECC_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit source for the overrides.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, lookup);
    Ok(config)
}

/// Applies overrides from `lookup`. Unparseable values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("RECC_DB_HOST") {
        config.database.host = host;
    }
    if let Some(port) = lookup("RECC_DB_PORT") {
        if let Ok(parsed) = port.parse() {
            config.database.port = parsed;
        }
    }
    if let Some(user) = lookup("RECC_DB_USER") {
        config.database.user = user;
    }
    if let Some(password) = lookup("RECC_DB_PASSWORD") {
        config.database.password = password;
    }
    if let Some(name) = lookup("RECC_DB_NAME") {
        config.database.database = name;
    }
    if let Some(level) = lookup("RECC_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("RECC_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
