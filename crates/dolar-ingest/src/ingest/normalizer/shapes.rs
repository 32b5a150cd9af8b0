//! Recognition of the upstream payload layouts.
//!
//! The set of accepted layouts is closed. [`classify`] picks one in priority
//! order and the recursive search only runs when nothing structural matched.

use serde_json::{Map, Value};
use std::fmt;

use super::values::RecordRejection;

pub const TIMESTAMP_FIELD: &str = "fechahora";
pub const VALUE_FIELD: &str = "valor";

/// Number of payload characters quoted when no layout matches.
pub const SAMPLE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadShape<'a> {
    /// `[[millis, value], ...]`
    MillisPairs(&'a [Value]),
    /// `[{"fechahora": .., "valor": ..}, ...]`
    RecordList(&'a [Value]),
    /// `{"fechahora": .., "valor": ..}`
    SingleRecord(&'a Map<String, Value>),
    /// First `{fechahora, valor}` object found anywhere in the document.
    Nested(&'a Map<String, Value>),
}

impl<'a> PayloadShape<'a> {
    pub fn kind(&self) -> ShapeKind {
        match self {
            PayloadShape::MillisPairs(_) => ShapeKind::MillisPairs,
            PayloadShape::RecordList(_) => ShapeKind::RecordList,
            PayloadShape::SingleRecord(_) => ShapeKind::SingleRecord,
            PayloadShape::Nested(_) => ShapeKind::Nested,
        }
    }

    /// Raw `(timestamp, value)` candidates, one per element of the payload.
    pub fn candidates(&self) -> Vec<Result<RawPair<'a>, RecordRejection>> {
        match *self {
            PayloadShape::MillisPairs(items) => items.iter().map(pair_from_array).collect(),
            PayloadShape::RecordList(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => pair_from_object(map),
                    other => Err(RecordRejection::Malformed(format!(
                        "expected an object, found {}",
                        type_name(other)
                    ))),
                })
                .collect(),
            PayloadShape::SingleRecord(map) | PayloadShape::Nested(map) => {
                vec![pair_from_object(map)]
            }
        }
    }
}

/// Payload layout without the borrowed data, for logs and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    MillisPairs,
    RecordList,
    SingleRecord,
    Nested,
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShapeKind::MillisPairs => "millis-pairs",
            ShapeKind::RecordList => "record-list",
            ShapeKind::SingleRecord => "single-record",
            ShapeKind::Nested => "nested",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPair<'a> {
    pub observed_at: &'a Value,
    pub value: &'a Value,
}

pub fn classify(document: &Value) -> Option<PayloadShape<'_>> {
    match document {
        Value::Array(items) => match items.first() {
            Some(Value::Array(first)) if first.len() >= 2 => Some(PayloadShape::MillisPairs(items)),
            Some(Value::Object(_)) => Some(PayloadShape::RecordList(items)),
            _ => find_record(document).map(PayloadShape::Nested),
        },
        Value::Object(map) if is_record(map) => Some(PayloadShape::SingleRecord(map)),
        _ => find_record(document).map(PayloadShape::Nested),
    }
}

fn is_record(map: &Map<String, Value>) -> bool {
    map.contains_key(TIMESTAMP_FIELD) && map.contains_key(VALUE_FIELD)
}

/// Depth-first, in document order.
fn find_record(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) if is_record(map) => Some(map),
        Value::Object(map) => map.values().find_map(find_record),
        Value::Array(items) => items.iter().find_map(find_record),
        _ => None,
    }
}

fn pair_from_array(item: &Value) -> Result<RawPair<'_>, RecordRejection> {
    match item {
        Value::Array(parts) if parts.len() >= 2 => Ok(RawPair {
            observed_at: &parts[0],
            value: &parts[1],
        }),
        Value::Array(parts) => Err(RecordRejection::Malformed(format!(
            "pair has {} element(s), expected 2",
            parts.len()
        ))),
        other => Err(RecordRejection::Malformed(format!(
            "expected a [millis, value] pair, found {}",
            type_name(other)
        ))),
    }
}

fn pair_from_object(map: &Map<String, Value>) -> Result<RawPair<'_>, RecordRejection> {
    let observed_at = map
        .get(TIMESTAMP_FIELD)
        .ok_or(RecordRejection::MissingField(TIMESTAMP_FIELD))?;
    let value = map
        .get(VALUE_FIELD)
        .ok_or(RecordRejection::MissingField(VALUE_FIELD))?;
    Ok(RawPair { observed_at, value })
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// First [`SAMPLE_CHARS`] characters of `text`, for warning logs.
pub fn sample(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SAMPLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
