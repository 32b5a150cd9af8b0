//! S3 event notifications
//!
//! Only the fields the normalizer needs are modelled:
//!
//! ```json
//! {"Records": [{"s3": {"bucket": {"name": "b"}, "object": {"key": "dolar-1.json"}}}]}
//! ```
//!
//! Object keys arrive URL-encoded with `+` standing for a space.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Malformed storage event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Object key '{key}' is not valid URL encoding: {reason}")]
    InvalidKey { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A decoded bucket/key pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.key.to_lowercase().ends_with(".json")
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl StorageEvent {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Builds the event S3 would send for a single object. The key is
    /// encoded the same way S3 does.
    pub fn for_object(bucket: &str, key: &str) -> Self {
        Self {
            records: vec![EventRecord {
                event_name: Some("ObjectCreated:Put".to_string()),
                s3: S3Entity {
                    bucket: BucketRef {
                        name: bucket.to_string(),
                    },
                    object: ObjectRef {
                        key: encode_key(key),
                        size: None,
                    },
                },
            }],
        }
    }
}

impl EventRecord {
    pub fn location(&self) -> Result<ObjectLocation, EventError> {
        Ok(ObjectLocation::new(
            self.s3.bucket.name.clone(),
            decode_key(&self.s3.object.key)?,
        ))
    }
}

/// Reverses S3's key encoding: `+` is a space, everything else is percent-encoded.
pub fn decode_key(raw: &str) -> Result<String, EventError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| EventError::InvalidKey {
            key: raw.to_string(),
            reason: e.to_string(),
        })
}

pub fn encode_key(key: &str) -> String {
    key.split(' ')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_notification() {
        let raw = r#"{
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "dolar-raw-0723", "arn": "arn:aws:s3:::dolar-raw-0723"},
                    "object": {"key": "dolar-1704110400.json", "size": 1024}
                }
            }]
        }"#;
        let event = StorageEvent::from_slice(raw.as_bytes()).unwrap();

        assert_eq!(event.records.len(), 1);
        let location = event.records[0].location().unwrap();
        assert_eq!(location, ObjectLocation::new("dolar-raw-0723", "dolar-1704110400.json"));
        assert_eq!(event.records[0].s3.object.size, Some(1024));
    }

    #[test]
    fn test_missing_records_is_empty() {
        let event = StorageEvent::from_slice(b"{}").unwrap();
        assert!(event.records.is_empty());
    }

    #[test]
    fn test_malformed_event() {
        assert!(matches!(
            StorageEvent::from_slice(b"not json"),
            Err(EventError::Malformed(_))
        ));
        assert!(StorageEvent::from_slice(br#"{"Records": [{"s3": {}}]}"#).is_err());
    }

    #[test]
    fn test_decode_key() {
        assert_eq!(decode_key("rates/dolar+hoy.json").unwrap(), "rates/dolar hoy.json");
        assert_eq!(decode_key("a%2Bb.json").unwrap(), "a+b.json");
        assert_eq!(decode_key("a%C3%B1o.json").unwrap(), "año.json");
    }

    #[test]
    fn test_key_with_invalid_utf8_escape() {
        assert!(matches!(
            decode_key("bad%FF.json"),
            Err(EventError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_for_object_round_trips_awkward_keys() {
        let event = StorageEvent::for_object("bucket", "dolar hoy+1.json");
        assert_eq!(event.records[0].s3.object.key, "dolar+hoy%2B1.json");
        assert_eq!(
            event.records[0].location().unwrap().key,
            "dolar hoy+1.json"
        );
    }

    #[test]
    fn test_is_json_is_case_insensitive() {
        assert!(ObjectLocation::new("b", "DOLAR-1.JSON").is_json());
        assert!(!ObjectLocation::new("b", "quotes.txt").is_json());
        assert!(!ObjectLocation::new("b", "dolar.json.bak").is_json());
    }
}
