//! Common types used across the dolar pipeline

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Status reported when a stage succeeded or soft-skipped its input.
pub const STATUS_OK: u16 = 200;

/// Status reported when the input was malformed but handled.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Status reported when a stage hit a hard failure.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// A normalized exchange-rate quote.
///
/// `observed_at` is a UTC wall-clock timestamp and the natural key of the
/// `dolar` table: at most one record exists per distinct value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateRecord {
    pub observed_at: NaiveDateTime,
    pub value: f64,
}

impl ExchangeRateRecord {
    pub fn new(observed_at: NaiveDateTime, value: f64) -> Self {
        Self { observed_at, value }
    }
}

impl std::fmt::Display for ExchangeRateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.observed_at.format("%Y-%m-%d %H:%M:%S"), self.value)
    }
}

/// Result handed back to whatever triggered a pipeline stage.
///
/// Serialized as `{"statusCode": 200, "body": "..."}` so the trigger
/// infrastructure can log or alert on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl HandlerResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(STATUS_OK, body)
    }

    pub fn bad_request(body: impl Into<String>) -> Self {
        Self::new(STATUS_BAD_REQUEST, body)
    }

    pub fn internal_error(body: impl Into<String>) -> Self {
        Self::new(STATUS_INTERNAL_ERROR, body)
    }

    /// True for 5xx statuses, the only ones that should page someone.
    pub fn is_failure(&self) -> bool {
        self.status_code >= STATUS_INTERNAL_ERROR
    }
}
