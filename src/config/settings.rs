//! Engine settings from environment variables.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Locations and switches shared by every command.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root of synda's local state. `SYNDA_HOME`, default `$HOME/.synda`.
    pub home: PathBuf,
    /// `SYNDA_DATABASE_PATH`, default `$SYNDA_HOME/synda.db`.
    pub database_path: PathBuf,
    /// `SYNDA_ENABLE_CACHE`, default `true`.
    pub cache_enabled: bool,
    /// `SYNDA_CACHE_DIR`, default `$SYNDA_HOME/cache`.
    pub cache_dir: PathBuf,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if neither `SYNDA_HOME` nor `HOME`
    /// is set, and `ConfigError::InvalidValue` for an unparsable flag.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = match lookup("SYNDA_HOME") {
            Some(val) => PathBuf::from(val),
            None => lookup("HOME")
                .map(|h| PathBuf::from(h).join(".synda"))
                .ok_or_else(|| ConfigError::MissingEnvVar("SYNDA_HOME".to_string()))?,
        };

        let database_path = lookup("SYNDA_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("synda.db"));

        let cache_enabled = match lookup("SYNDA_ENABLE_CACHE") {
            Some(val) => parse_env_bool(&val, "SYNDA_ENABLE_CACHE")?,
            None => true,
        };

        let cache_dir = lookup("SYNDA_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("cache"));

        Ok(Self {
            home,
            database_path,
            cache_enabled,
            cache_dir,
        })
    }

    /// Cache database file.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join("cache.db")
    }
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
