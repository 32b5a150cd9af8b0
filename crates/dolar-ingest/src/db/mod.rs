//! Relational persistence for normalized quotes
//!
//! The normalizer only sees [`RateStore`] and [`RateTransaction`]. Each call
//! to [`RateStore::begin`] opens one connection and one transaction. The
//! connection is gone once the transaction is committed, rolled back, or
//! dropped.

use async_trait::async_trait;
use dolar_common::ExchangeRateRecord;
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnectOptions;
use std::time::Duration;
use thiserror::Error;

use crate::config::{parse_var, string_var, ConfigError, ConfigResult, Lookup};

pub mod memory;
pub mod mysql;

pub use memory::InMemoryRateStore;
pub use mysql::MySqlRateStore;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_DB_NAME: &str = "dolar";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// SQL statement or protocol error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The connection could not be established at all
    #[error("Failed to connect to database at {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// A statement did not finish within its deadline
    #[error("Database {operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// Failure reported by a non-SQL backend
    #[error("Database backend error: {0}")]
    Backend(String),
}

impl DbError {
    pub fn connect(config: &DbConfig, source: sqlx::Error) -> Self {
        Self::Connect {
            target: config.target(),
            source,
        }
    }

    pub fn timeout(operation: &'static str, limit: Duration) -> Self {
        Self::Timeout {
            operation,
            seconds: limit.as_secs(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            database: DEFAULT_DB_NAME.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
        }
    }
}

impl DbConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> ConfigResult<Self> {
        Ok(Self {
            host: string_var(lookup, "RDS_HOST", DEFAULT_HOST),
            port: parse_var(lookup, "RDS_PORT", DEFAULT_PORT)?,
            user: string_var(lookup, "RDS_USER", DEFAULT_USER),
            // an empty password is legitimate, so no blank-means-default here
            password: lookup("RDS_PASSWORD").unwrap_or_default(),
            database: string_var(lookup, "RDS_DB_NAME", DEFAULT_DB_NAME),
            connect_timeout_secs: parse_var(
                lookup,
                "RDS_CONNECT_TIMEOUT",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            read_timeout_secs: parse_var(lookup, "RDS_READ_TIMEOUT", DEFAULT_READ_TIMEOUT_SECS)?,
            write_timeout_secs: parse_var(lookup, "RDS_WRITE_TIMEOUT", DEFAULT_WRITE_TIMEOUT_SECS)?,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::validation("Database host cannot be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::validation("Database name cannot be empty"));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 || self.write_timeout_secs == 0
        {
            return Err(ConfigError::validation(
                "Database timeouts must be greater than 0",
            ));
        }
        Ok(())
    }

    /// `host:port/database`, safe to log.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .charset("utf8mb4")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// What an upsert did to the row keyed by the record's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[async_trait]
pub trait RateStore: Send + Sync {
    /// Opens a connection and starts a transaction on it.
    async fn begin(&self) -> DbResult<Box<dyn RateTransaction>>;
}

#[async_trait]
pub trait RateTransaction: Send {
    /// Inserts the record, or overwrites the value stored for its timestamp.
    async fn upsert(&mut self, record: &ExchangeRateRecord) -> DbResult<UpsertOutcome>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.user, "root");
        assert_eq!(config.database, "dolar");
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let lookup = |key: &str| match key {
            "RDS_HOST" => Some("db.internal".to_string()),
            "RDS_PORT" => Some("3307".to_string()),
            "RDS_PASSWORD" => Some("s3cret".to_string()),
            _ => None,
        };
        let config = DbConfig::from_lookup(&lookup).unwrap();

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3307);
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.target(), "db.internal:3307/dolar");
    }

    #[test]
    fn test_invalid_port() {
        let lookup = |key: &str| (key == "RDS_PORT").then(|| "70000".to_string());
        assert!(DbConfig::from_lookup(&lookup).is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DbConfig {
            password: "hunter2".to_string(),
            ..DbConfig::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_zero_read_timeout_rejected() {
        let config = DbConfig {
            read_timeout_secs: 0,
            ..DbConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_error_message() {
        let err = DbError::timeout("upsert", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Database upsert timed out after 30s");
    }
}
