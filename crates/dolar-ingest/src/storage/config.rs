use crate::config::{bool_var, first_var, parse_var, string_var, ConfigError, ConfigResult, Lookup};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint (MinIO, LocalStack); `None` targets AWS.
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials. When absent the default AWS provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("path_style", &self.path_style)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

impl StorageConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> ConfigResult<Self> {
        Ok(Self {
            endpoint: first_var(lookup, &["S3_ENDPOINT"]),
            region: string_var(lookup, "S3_REGION", DEFAULT_REGION),
            access_key: first_var(lookup, &["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"]),
            secret_key: first_var(lookup, &["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"]),
            path_style: bool_var(lookup, "S3_PATH_STYLE", false)?,
            connect_timeout_secs: parse_var(
                lookup,
                "S3_CONNECT_TIMEOUT",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            operation_timeout_secs: parse_var(
                lookup,
                "S3_OPERATION_TIMEOUT",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?,
        })
    }

    /// Local S3-compatible server such as MinIO.
    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            ..Self::default()
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::validation("S3 region cannot be empty"));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::validation(
                "S3 access key and secret key must be set together",
            ));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(ConfigError::validation("S3 timeouts must be greater than 0"));
        }
        Ok(())
    }
}
