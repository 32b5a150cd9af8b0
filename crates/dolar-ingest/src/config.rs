//! Pipeline configuration
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file). Each section owns its own defaults:
//!
//! - [`FetcherConfig`]: upstream API and landing bucket
//! - [`StorageConfig`]: S3 client settings
//! - [`DbConfig`]: MySQL connection settings
//! - [`NormalizerConfig`]: payload decoding settings
//!
//! Tests build configurations through [`Config::from_lookup`] so they never
//! touch the process environment.

use crate::db::DbConfig;
use crate::ingest::decode::TextEncoding;
use crate::storage::config::StorageConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_API_URL: &str = "https://totoro.banrep.gov.co/estadisticas-economicas/rest/consultaDatosService/consultaMercadoCambiario";
pub const DEFAULT_BUCKET: &str = "dolar-raw-0723";
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ENCODINGS: &str = "utf-8,iso-8859-1";

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidVar {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Failed to read env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid_var(var: &str, value: &str, reason: impl ToString) -> Self {
        Self::InvalidVar {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Source of configuration values, usually the process environment.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// First non-empty value among `keys`.
pub(crate) fn first_var(lookup: Lookup<'_>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
}

pub(crate) fn string_var(lookup: Lookup<'_>, key: &str, default: &str) -> String {
    first_var(lookup, &[key]).unwrap_or_else(|| default.to_string())
}

pub(crate) fn parse_var<T>(lookup: Lookup<'_>, key: &str, default: T) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match first_var(lookup, &[key]) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid_var(key, &raw, e)),
        None => Ok(default),
    }
}

pub(crate) fn bool_var(lookup: Lookup<'_>, key: &str, default: bool) -> ConfigResult<bool> {
    match first_var(lookup, &[key]) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid_var(key, &raw, "expected a boolean")),
        },
        None => Ok(default),
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Settings for the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherConfig {
    pub api_url: String,
    pub bucket: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl FetcherConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> ConfigResult<Self> {
        Ok(Self {
            api_url: string_var(lookup, "DOLAR_API_URL", DEFAULT_API_URL),
            bucket: string_var(lookup, "DOLAR_BUCKET", DEFAULT_BUCKET),
            connect_timeout_secs: parse_var(
                lookup,
                "DOLAR_HTTP_CONNECT_TIMEOUT",
                DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            )?,
            timeout_secs: parse_var(lookup, "DOLAR_HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT_SECS)?,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::validation("API URL cannot be empty"));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ConfigError::validation(format!(
                "API URL must be http(s): {}",
                self.api_url
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::validation("Bucket cannot be empty"));
        }
        if self.connect_timeout_secs == 0 || self.timeout_secs == 0 {
            return Err(ConfigError::validation("HTTP timeouts must be greater than 0"));
        }
        Ok(())
    }
}

/// Settings for the normalize stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Encodings tried in order when turning object bytes into text.
    pub encodings: Vec<TextEncoding>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            encodings: vec![TextEncoding::Utf8, TextEncoding::Latin1],
        }
    }
}

impl NormalizerConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> ConfigResult<Self> {
        let raw = string_var(lookup, "DOLAR_ENCODINGS", DEFAULT_ENCODINGS);
        let encodings = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                name.parse::<TextEncoding>()
                    .map_err(|e| ConfigError::invalid_var("DOLAR_ENCODINGS", &raw, e))
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self { encodings })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.encodings.is_empty() {
            return Err(ConfigError::validation("At least one encoding is required"));
        }
        Ok(())
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
    pub database: DbConfig,
    pub normalizer: NormalizerConfig,
}

impl Config {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn load() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Reads `path` as a dotenv file. Variables already present in the
    /// process environment win over the file, and the environment itself
    /// is left untouched.
    pub fn from_env_file(path: &Path) -> ConfigResult<Self> {
        let env_file_error = |e: dotenvy::Error| ConfigError::EnvFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let file_vars = dotenvy::from_path_iter(path)
            .map_err(env_file_error)?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(env_file_error)?;

        Self::from_lookup(&|key: &str| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> ConfigResult<Self> {
        let config = Self {
            fetcher: FetcherConfig::from_lookup(lookup)?,
            storage: StorageConfig::from_lookup(lookup)?,
            database: DbConfig::from_lookup(lookup)?,
            normalizer: NormalizerConfig::from_lookup(lookup)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.fetcher.validate()?;
        self.storage.validate()?;
        self.database.validate()?;
        self.normalizer.validate()?;
        Ok(())
    }
}
