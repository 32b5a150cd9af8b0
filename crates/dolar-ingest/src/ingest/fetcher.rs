//! Fetcher stage
//!
//! One GET against the exchange-rate API, one object written to storage.
//! There is no retry: a failed run is simply the next scheduled run's job.

use chrono::{DateTime, Utc};
use dolar_common::types::STATUS_INTERNAL_ERROR;
use dolar_common::HandlerResponse;
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::config::FetcherConfig;
use crate::storage::{ObjectStore, StorageError};

pub const JSON_CONTENT_TYPE: &str = "application/json";

const USER_AGENT: &str = concat!("dolar-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API at {url} answered with HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("API at {url} returned a body that is not valid JSON: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FetchError {
    /// Every fetch failure is a hard failure.
    pub fn status_code(&self) -> u16 {
        STATUS_INTERNAL_ERROR
    }
}

/// Source of the timestamp embedded in object keys.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub bucket: String,
    pub key: String,
    pub size: usize,
    pub checksum: String,
}

pub fn object_key(now: DateTime<Utc>) -> String {
    format!("dolar-{}.json", now.timestamp())
}

/// Pretty-prints with four-space indentation.
pub fn to_pretty_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

pub struct Fetcher<O, C = SystemClock> {
    client: Client,
    store: O,
    config: FetcherConfig,
    clock: C,
}

impl<O: ObjectStore> Fetcher<O> {
    pub fn new(config: FetcherConfig, store: O) -> Result<Self, FetchError> {
        Self::with_clock(config, store, SystemClock)
    }
}

impl<O, C> Fetcher<O, C>
where
    O: ObjectStore,
    C: Clock,
{
    pub fn with_clock(config: FetcherConfig, store: O, clock: C) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            store,
            config,
            clock,
        })
    }

    #[instrument(skip(self), fields(url = %self.config.api_url, bucket = %self.config.bucket))]
    pub async fn run(&self) -> Result<FetchReport, FetchError> {
        let url = &self.config.api_url;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;
        debug!(status = status.as_u16(), size = body.len(), "API responded");

        let payload: Value =
            serde_json::from_slice(&body).map_err(|source| FetchError::InvalidJson {
                url: url.clone(),
                source,
            })?;

        let data = to_pretty_json(&payload).map_err(FetchError::Serialize)?;
        let key = object_key(self.clock.now());

        let upload = self
            .store
            .put_object(&self.config.bucket, &key, data, Some(JSON_CONTENT_TYPE))
            .await?;

        info!(
            key = %upload.key,
            size = upload.size,
            checksum = %upload.checksum,
            "Stored exchange-rate snapshot"
        );

        Ok(FetchReport {
            bucket: upload.bucket,
            key: upload.key,
            size: upload.size,
            checksum: upload.checksum,
        })
    }

    /// Runs once and folds the result into a handler response.
    pub async fn handle(&self) -> HandlerResponse {
        match self.run().await {
            Ok(report) => HandlerResponse::ok(format!(
                "Exchange-rate data stored at s3://{}/{} ({} bytes)",
                report.bucket, report.key, report.size
            )),
            Err(err) => {
                error!(error = %err, "Fetch failed");
                HandlerResponse::new(err.status_code(), err.to_string())
            }
        }
    }
}
