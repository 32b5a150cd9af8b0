//! Normalizer/loader stage
//!
//! Turns one stored API response into rows of the `dolar` table:
//!
//! 1. **load**: skip keys that are not `.json`, read the object bytes
//! 2. **decode**: first configured encoding that accepts the bytes
//! 3. **extract**: parse JSON and recognize a [`PayloadShape`]
//! 4. **validate**: convert each candidate into an [`ExchangeRateRecord`]
//! 5. **upsert**: write every valid record in one transaction
//!
//! Malformed payloads are soft skips (400), per-record problems are counted
//! in the [`LoadSummary`], and only infrastructure failures are hard (500).
//!
//! # Example
//!
//! ```no_run
//! use dolar_ingest::config::NormalizerConfig;
//! use dolar_ingest::db::InMemoryRateStore;
//! use dolar_ingest::ingest::events::ObjectLocation;
//! use dolar_ingest::ingest::normalizer::Normalizer;
//! use dolar_ingest::storage::InMemoryStore;
//!
//! # async fn run() {
//! let objects = InMemoryStore::new();
//! objects.insert("bucket", "dolar-1.json", r#"[[1704110400000, 4000.5]]"#);
//!
//! let normalizer = Normalizer::new(objects, InMemoryRateStore::new(), NormalizerConfig::default());
//! let response = normalizer.handle_object(&ObjectLocation::new("bucket", "dolar-1.json")).await;
//! assert_eq!(response.status_code, 200);
//! # }
//! ```

pub mod shapes;
pub mod values;

use dolar_common::types::{STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR, STATUS_OK};
use dolar_common::{ExchangeRateRecord, HandlerResponse};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NormalizerConfig;
use crate::db::{DbError, RateStore, UpsertOutcome};
use crate::ingest::decode::{decode_payload, DecodeError, TextEncoding};
use crate::ingest::events::{EventError, ObjectLocation, StorageEvent};
use crate::storage::{ObjectStore, StorageError};

pub use shapes::{classify, PayloadShape, ShapeKind};
pub use values::RecordRejection;

// ============================================================================
// Stages and outcomes
// ============================================================================

/// Where an invocation is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    LoadRaw,
    Decode,
    Extract,
    Validate,
    Upsert,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Start => "start",
            Stage::LoadRaw => "load_raw",
            Stage::Decode => "decode",
            Stage::Extract => "extract",
            Stage::Validate => "validate",
            Stage::Upsert => "upsert",
            Stage::Done => "done",
        })
    }
}

/// What happened to a single candidate record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Stored(UpsertOutcome),
    Skipped(RecordRejection),
    Errored(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl LoadSummary {
    pub fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Stored(UpsertOutcome::Inserted) => self.inserted += 1,
            RecordOutcome::Stored(UpsertOutcome::Updated) => self.updated += 1,
            RecordOutcome::Stored(UpsertOutcome::Unchanged) => self.unchanged += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
            RecordOutcome::Errored(_) => self.errored += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} updated={} unchanged={} skipped={} errored={}",
            self.inserted, self.updated, self.unchanged, self.skipped, self.errored
        )
    }
}

/// Why a whole object was skipped without touching the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotJson,
    InvalidJson(String),
    UnrecognizedShape,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectOutcome {
    Loaded {
        shape: ShapeKind,
        encoding: TextEncoding,
        summary: LoadSummary,
    },
    Skipped(SkipReason),
}

impl ObjectOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            ObjectOutcome::Loaded { .. } | ObjectOutcome::Skipped(SkipReason::NotJson) => STATUS_OK,
            ObjectOutcome::Skipped(_) => STATUS_BAD_REQUEST,
        }
    }

    pub fn summary(&self) -> Option<&LoadSummary> {
        match self {
            ObjectOutcome::Loaded { summary, .. } => Some(summary),
            ObjectOutcome::Skipped(_) => None,
        }
    }
}

impl fmt::Display for ObjectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectOutcome::Loaded {
                shape,
                encoding,
                summary,
            } => write!(f, "loaded {} payload ({}): {}", shape, encoding, summary),
            ObjectOutcome::Skipped(SkipReason::NotJson) => write!(f, "skipped, not a .json object"),
            ObjectOutcome::Skipped(SkipReason::InvalidJson(e)) => {
                write!(f, "skipped, payload is not valid JSON: {}", e)
            }
            ObjectOutcome::Skipped(SkipReason::UnrecognizedShape) => {
                write!(f, "skipped, no exchange-rate data found")
            }
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error(transparent)]
    InvalidEvent(#[from] EventError),

    #[error("Failed to read {location}: {source}")]
    Load {
        location: ObjectLocation,
        #[source]
        source: StorageError,
    },

    #[error("Failed to decode {location}: {source}")]
    Decode {
        location: ObjectLocation,
        #[source]
        source: DecodeError,
    },

    #[error("Database unavailable while loading {location}: {source}")]
    Connect {
        location: ObjectLocation,
        #[source]
        source: DbError,
    },

    #[error("{} record(s) from {location} failed to persist, transaction rolled back ({summary})", .summary.errored)]
    Persist {
        location: ObjectLocation,
        summary: LoadSummary,
    },

    #[error("Failed to commit {location}: {source}")]
    Commit {
        location: ObjectLocation,
        #[source]
        source: DbError,
    },
}

impl NormalizeError {
    pub fn stage(&self) -> Stage {
        match self {
            NormalizeError::InvalidEvent(_) => Stage::Start,
            NormalizeError::Load { .. } => Stage::LoadRaw,
            NormalizeError::Decode { .. } => Stage::Decode,
            NormalizeError::Connect { .. } | NormalizeError::Persist { .. } => Stage::Upsert,
            NormalizeError::Commit { .. } => Stage::Done,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            NormalizeError::InvalidEvent(_) => STATUS_BAD_REQUEST,
            _ => STATUS_INTERNAL_ERROR,
        }
    }
}

// ============================================================================
// Normalizer
// ============================================================================

pub struct Normalizer<O, R> {
    objects: O,
    rates: R,
    config: NormalizerConfig,
}

impl<O, R> Normalizer<O, R>
where
    O: ObjectStore,
    R: RateStore,
{
    pub fn new(objects: O, rates: R, config: NormalizerConfig) -> Self {
        Self {
            objects,
            rates,
            config,
        }
    }

    /// Entry point for a raw notification body.
    pub async fn handle_raw_event(&self, raw: &[u8]) -> HandlerResponse {
        match StorageEvent::from_slice(raw) {
            Ok(event) => self.handle_event(&event).await,
            Err(e) => {
                let err = NormalizeError::from(e);
                warn!(stage = %err.stage(), error = %err, "Rejecting storage event");
                HandlerResponse::new(err.status_code(), err.to_string())
            }
        }
    }

    /// Processes every record of `event` independently. The worst status wins.
    #[instrument(skip(self, event), fields(records = event.records.len()))]
    pub async fn handle_event(&self, event: &StorageEvent) -> HandlerResponse {
        if event.records.is_empty() {
            warn!("Storage event contains no records");
            return HandlerResponse::bad_request("Storage event contains no records");
        }

        let mut status = STATUS_OK;
        let mut lines = Vec::with_capacity(event.records.len());

        for record in &event.records {
            let response = match record.location() {
                Ok(location) => self.handle_object(&location).await,
                Err(e) => {
                    let err = NormalizeError::from(e);
                    warn!(stage = %err.stage(), error = %err, "Skipping event record");
                    HandlerResponse::new(err.status_code(), err.to_string())
                }
            };
            status = status.max(response.status_code);
            lines.push(response.body);
        }

        HandlerResponse::new(status, lines.join("\n"))
    }

    pub async fn handle_object(&self, location: &ObjectLocation) -> HandlerResponse {
        match self.process_object(location).await {
            Ok(outcome) => HandlerResponse::new(outcome.status_code(), format!("{}: {}", location, outcome)),
            Err(err) => {
                error!(
                    bucket = %location.bucket,
                    key = %location.key,
                    stage = %err.stage(),
                    error = %err,
                    "Failed to process object"
                );
                HandlerResponse::new(err.status_code(), err.to_string())
            }
        }
    }

    #[instrument(skip(self), fields(bucket = %location.bucket, key = %location.key))]
    pub async fn process_object(
        &self,
        location: &ObjectLocation,
    ) -> Result<ObjectOutcome, NormalizeError> {
        debug!(stage = %Stage::Start, "Processing object");

        if !location.is_json() {
            info!(stage = %Stage::LoadRaw, "Skipping object without a .json extension");
            return Ok(ObjectOutcome::Skipped(SkipReason::NotJson));
        }

        let bytes = self
            .objects
            .get_object(&location.bucket, &location.key)
            .await
            .map_err(|source| NormalizeError::Load {
                location: location.clone(),
                source,
            })?;
        debug!(stage = %Stage::LoadRaw, size = bytes.len(), "Object read");

        let decoded = decode_payload(&bytes, &self.config.encodings).map_err(|source| {
            NormalizeError::Decode {
                location: location.clone(),
                source,
            }
        })?;
        if self.config.encodings.first() != Some(&decoded.encoding) {
            info!(stage = %Stage::Decode, encoding = %decoded.encoding, "Decoded with fallback encoding");
        }

        let document: Value = match serde_json::from_str(&decoded.text) {
            Ok(document) => document,
            Err(e) => {
                warn!(stage = %Stage::Extract, error = %e, "Payload is not valid JSON");
                return Ok(ObjectOutcome::Skipped(SkipReason::InvalidJson(e.to_string())));
            }
        };

        let Some(shape) = classify(&document) else {
            warn!(
                stage = %Stage::Extract,
                sample = %shapes::sample(&decoded.text),
                "No recognizable exchange-rate layout"
            );
            return Ok(ObjectOutcome::Skipped(SkipReason::UnrecognizedShape));
        };
        debug!(stage = %Stage::Extract, shape = %shape.kind(), "Payload recognized");

        let mut summary = LoadSummary::default();
        let mut records = Vec::new();
        for (index, candidate) in shape.candidates().into_iter().enumerate() {
            match candidate.and_then(|pair| values::validate(&pair)) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(stage = %Stage::Validate, index, %reason, "Skipping record");
                    summary.record(&RecordOutcome::Skipped(reason));
                }
            }
        }

        let summary = if records.is_empty() {
            info!(stage = %Stage::Validate, skipped = summary.skipped, "No valid records to load");
            summary
        } else {
            self.persist(location, &records, summary).await?
        };

        Ok(ObjectOutcome::Loaded {
            shape: shape.kind(),
            encoding: decoded.encoding,
            summary,
        })
    }

    async fn persist(
        &self,
        location: &ObjectLocation,
        records: &[ExchangeRateRecord],
        mut summary: LoadSummary,
    ) -> Result<LoadSummary, NormalizeError> {
        let mut tx = self
            .rates
            .begin()
            .await
            .map_err(|source| NormalizeError::Connect {
                location: location.clone(),
                source,
            })?;

        for record in records {
            let outcome = match tx.upsert(record).await {
                Ok(outcome) => RecordOutcome::Stored(outcome),
                Err(e) => {
                    error!(stage = %Stage::Upsert, record = %record, error = %e, "Failed to upsert record");
                    RecordOutcome::Errored(e.to_string())
                }
            };
            summary.record(&outcome);
        }

        if summary.errored > 0 {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback failed, the connection is discarded");
            }
            return Err(NormalizeError::Persist {
                location: location.clone(),
                summary,
            });
        }

        tx.commit().await.map_err(|source| NormalizeError::Commit {
            location: location.clone(),
            source,
        })?;

        info!(
            stage = %Stage::Done,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            "Object loaded"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::InMemoryRateStore;
    use crate::storage::InMemoryStore;
    use chrono::{NaiveDate, NaiveDateTime};

    const BUCKET: &str = "dolar-raw-0723";

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn setup() -> (
        Normalizer<InMemoryStore, InMemoryRateStore>,
        InMemoryStore,
        InMemoryRateStore,
    ) {
        let objects = InMemoryStore::new();
        let rates = InMemoryRateStore::new();
        let normalizer = Normalizer::new(objects.clone(), rates.clone(), NormalizerConfig::default());
        (normalizer, objects, rates)
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = LoadSummary::default();
        summary.record(&RecordOutcome::Stored(UpsertOutcome::Inserted));
        summary.record(&RecordOutcome::Stored(UpsertOutcome::Unchanged));
        summary.record(&RecordOutcome::Skipped(RecordRejection::MissingField("valor")));
        summary.record(&RecordOutcome::Errored("boom".to_string()));

        assert_eq!(summary.processed(), 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(
            summary.to_string(),
            "inserted=1 updated=0 unchanged=1 skipped=1 errored=1"
        );
    }

    #[test]
    fn test_outcome_status_codes() {
        assert_eq!(ObjectOutcome::Skipped(SkipReason::NotJson).status_code(), 200);
        assert_eq!(
            ObjectOutcome::Skipped(SkipReason::UnrecognizedShape).status_code(),
            400
        );
        assert_eq!(
            ObjectOutcome::Skipped(SkipReason::InvalidJson("eof".into())).status_code(),
            400
        );
    }

    #[tokio::test]
    async fn test_single_record_object() {
        let (normalizer, objects, rates) = setup();
        objects.insert(
            BUCKET,
            "dolar-1.json",
            r#"{"fechahora": "2024-01-01T12:00:00Z", "valor": 4000.5}"#,
        );

        let outcome = normalizer
            .process_object(&ObjectLocation::new(BUCKET, "dolar-1.json"))
            .await
            .unwrap();

        assert_eq!(outcome.summary().unwrap().inserted, 1);
        assert_eq!(rates.value_at(noon()), Some(4000.5));
    }

    #[tokio::test]
    async fn test_no_valid_records_opens_no_connection() {
        let (normalizer, objects, rates) = setup();
        objects.insert(BUCKET, "dolar-1.json", r#"[{"fechahora": "x", "valor": "y"}]"#);

        let outcome = normalizer
            .process_object(&ObjectLocation::new(BUCKET, "dolar-1.json"))
            .await
            .unwrap();

        assert_eq!(outcome.summary().unwrap().skipped, 1);
        assert_eq!(rates.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_a_load_failure() {
        let (normalizer, _objects, _rates) = setup();

        let err = normalizer
            .process_object(&ObjectLocation::new(BUCKET, "gone.json"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::LoadRaw);
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_decode_failure_without_fallback() {
        let objects = InMemoryStore::new();
        let normalizer = Normalizer::new(
            objects.clone(),
            InMemoryRateStore::new(),
            NormalizerConfig {
                encodings: vec![TextEncoding::Utf8],
            },
        );
        objects.insert(BUCKET, "dolar-1.json", b"{\"moneda\": \"a\xF1o\"}".to_vec());

        let err = normalizer
            .process_object(&ObjectLocation::new(BUCKET, "dolar-1.json"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Decode);
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_commit_failure_is_hard_failure() {
        let (normalizer, objects, rates) = setup();
        rates.fail_commit();
        objects.insert(BUCKET, "dolar-1.json", "[[1704110400000, 4000.5]]");

        let err = normalizer
            .process_object(&ObjectLocation::new(BUCKET, "dolar-1.json"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Done);
        assert!(rates.rows().is_empty());
        assert_eq!(rates.connections_open(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_rolls_back_siblings() {
        let (normalizer, objects, rates) = setup();
        rates.fail_upsert_at(noon());
        objects.insert(
            BUCKET,
            "dolar-1.json",
            "[[1704106800000, 3999.0], [1704110400000, 4000.5], [1704114000000, 4001.0]]",
        );

        let err = normalizer
            .process_object(&ObjectLocation::new(BUCKET, "dolar-1.json"))
            .await
            .unwrap_err();

        match err {
            NormalizeError::Persist { summary, .. } => {
                assert_eq!(summary.inserted, 2);
                assert_eq!(summary.errored, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(rates.rows().is_empty());
        assert_eq!(rates.rollbacks(), 1);
        assert_eq!(rates.connections_open(), 0);
    }

    #[tokio::test]
    async fn test_malformed_event_is_bad_request() {
        let (normalizer, _objects, rates) = setup();

        let response = normalizer.handle_raw_event(b"{\"Records\": 42}").await;

        assert_eq!(response.status_code, 400);
        assert_eq!(rates.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_event_is_bad_request() {
        let (normalizer, _objects, _rates) = setup();
        let response = normalizer.handle_raw_event(br#"{"Records": []}"#).await;
        assert_eq!(response.status_code, 400);
    }
}
