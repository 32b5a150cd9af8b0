//! Shared helpers for dolar-ingest integration tests
//!
//! - [`TestMysql`]: MySQL container with the `dolar` table created
//! - [`TestMinio`]: MinIO container with the raw bucket created
//! - fixtures for building payloads and timestamps

#![allow(dead_code)]

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client as S3Client;
use chrono::{NaiveDate, NaiveDateTime};
use dolar_ingest::db::DbConfig;
use dolar_ingest::storage::{S3Store, StorageConfig};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use testcontainers_modules::mysql::Mysql;
use tracing::{debug, info};

/// Reference DDL shipped with the repository.
pub const DOLAR_DDL: &str = include_str!("../../../../sql/dolar.sql");

pub const TEST_BUCKET: &str = "dolar-raw-0723";

/// Default MinIO credentials, the ones [`StorageConfig::for_minio`] uses.
pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, min, s))
        .unwrap_or_else(|| panic!("invalid test timestamp {y}-{m}-{d} {h}:{min}:{s}"))
}

/// 2024-01-01 12:00:00 UTC, the timestamp most fixtures use.
pub fn noon() -> NaiveDateTime {
    at(2024, 1, 1, 12, 0, 0)
}

// ============================================================================
// MySQL Test Container
// ============================================================================

pub struct TestMysql {
    container: ContainerAsync<Mysql>,
    pool: MySqlPool,
    config: DbConfig,
}

impl TestMysql {
    /// Starts MySQL and creates the `dolar` table.
    pub async fn start() -> Result<Self> {
        info!("Starting MySQL test container...");

        let container = Mysql::default()
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(3306.tcp())
            .await
            .context("Failed to get container port")?;

        // the module's defaults: root with an empty password, database `test`
        let config = DbConfig {
            host: host.to_string(),
            port,
            user: "root".to_string(),
            password: String::new(),
            database: "test".to_string(),
            ..DbConfig::default()
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(config.connect_options())
            .await
            .context("Failed to connect to MySQL")?;

        sqlx::raw_sql(DOLAR_DDL)
            .execute(&pool)
            .await
            .context("Failed to create dolar table")?;

        Ok(Self {
            container,
            pool,
            config,
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn config(&self) -> DbConfig {
        self.config.clone()
    }

    pub async fn row_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM dolar")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn value_at(&self, observed_at: NaiveDateTime) -> Result<Option<f64>> {
        Ok(
            sqlx::query_scalar("SELECT CAST(valor AS DOUBLE) FROM dolar WHERE fechahora = ?")
                .bind(observed_at)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub struct TestMinio {
    container: ContainerAsync<GenericImage>,
    client: S3Client,
    endpoint: String,
}

impl TestMinio {
    /// Starts MinIO and creates [`TEST_BUCKET`].
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", MINIO_ACCESS_KEY)
            .with_env_var("MINIO_ROOT_PASSWORD", MINIO_SECRET_KEY)
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;

        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                MINIO_ACCESS_KEY,
                MINIO_SECRET_KEY,
                None,
                None,
                "static",
            ))
            .load()
            .await;
        let client = S3Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .endpoint_url(&endpoint)
                .force_path_style(true)
                .build(),
        );

        info!("Creating test bucket: {}", TEST_BUCKET);
        client
            .create_bucket()
            .bucket(TEST_BUCKET)
            .send()
            .await
            .context("Failed to create S3 bucket")?;

        Ok(Self {
            container,
            client,
            endpoint,
        })
    }

    /// Configuration the CLI would build for this server.
    pub fn config(&self) -> StorageConfig {
        StorageConfig::for_minio(self.endpoint.clone())
    }

    /// Store sharing the harness client.
    pub fn store(&self) -> S3Store {
        S3Store::from_client(self.client.clone())
    }

    pub async fn content_type(&self, key: &str) -> Result<Option<String>> {
        let head = self
            .client
            .head_object()
            .bucket(TEST_BUCKET)
            .key(key)
            .send()
            .await
            .context("Failed to head S3 object")?;
        Ok(head.content_type().map(str::to_string))
    }
}
