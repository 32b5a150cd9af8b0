//! Conversion of raw JSON fields into a validated [`ExchangeRateRecord`].

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use dolar_common::ExchangeRateRecord;
use serde_json::Value;
use thiserror::Error;

use super::shapes::{type_name, RawPair};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Why a candidate pair was not turned into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("malformed element: {0}")]
    Malformed(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub fn validate(pair: &RawPair<'_>) -> Result<ExchangeRateRecord, RecordRejection> {
    let observed_at = parse_observed_at(pair.observed_at)?;
    let value = parse_value(pair.value)?;
    Ok(ExchangeRateRecord::new(observed_at, value))
}

/// Accepts ISO-8601-like strings or milliseconds since the Unix epoch.
///
/// Offsets are converted to UTC. Strings without an offset (or with `Z`)
/// are taken as UTC already. The result must fit a MySQL `DATETIME`,
/// years 1000 through 9999.
pub fn parse_observed_at(raw: &Value) -> Result<NaiveDateTime, RecordRejection> {
    parse_timestamp(raw).and_then(within_column_range)
}

fn parse_timestamp(raw: &Value) -> Result<NaiveDateTime, RecordRejection> {
    match raw {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| RecordRejection::InvalidTimestamp(format!("{} is not integral milliseconds", n)))?;
            from_millis(millis)
        }
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                let millis = s.parse::<i64>().map_err(|e| {
                    RecordRejection::InvalidTimestamp(format!("'{}': {}", s, e))
                })?;
                return from_millis(millis);
            }
            parse_iso(s).ok_or_else(|| RecordRejection::InvalidTimestamp(format!("'{}'", s)))
        }
        other => Err(RecordRejection::InvalidTimestamp(format!(
            "expected a string or number, found {}",
            type_name(other)
        ))),
    }
}

fn from_millis(millis: i64) -> Result<NaiveDateTime, RecordRejection> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| RecordRejection::InvalidTimestamp(format!("{} ms is out of range", millis)))
}

fn within_column_range(ts: NaiveDateTime) -> Result<NaiveDateTime, RecordRejection> {
    let earliest = NaiveDate::from_ymd_opt(1000, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    let latest = NaiveDate::from_ymd_opt(9999, 12, 31).and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999));

    match (earliest, latest) {
        (Some(earliest), Some(latest)) if (earliest..=latest).contains(&ts) => Ok(ts),
        _ => Err(RecordRejection::InvalidTimestamp(format!(
            "{} is outside the storable range",
            ts
        ))),
    }
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let naive = s
        .strip_suffix('Z')
        .or_else(|| s.strip_suffix('z'))
        .unwrap_or(s);

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .or_else(|| {
            OFFSET_FORMATS
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// A finite, non-negative number given as a JSON number or numeric string.
pub fn parse_value(raw: &Value) -> Result<f64, RecordRejection> {
    let value = match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| RecordRejection::InvalidValue(n.to_string()))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RecordRejection::InvalidValue(format!("'{}' is not numeric", s)))?,
        other => {
            return Err(RecordRejection::InvalidValue(format!(
                "expected a number, found {}",
                type_name(other)
            )))
        }
    };

    if !value.is_finite() {
        return Err(RecordRejection::InvalidValue(format!("{} is not finite", value)));
    }
    if value < 0.0 {
        return Err(RecordRejection::InvalidValue(format!("{} is negative", value)));
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_iso_timestamps() {
        for raw in [
            "2024-01-01T12:00:00Z",
            "2024-01-01T12:00:00",
            "2024-01-01 12:00:00",
            " 2024-01-01T12:00:00.000Z ",
            "2024-01-01T12:00",
            "2024-01-01T07:00:00-05:00",
            "2024-01-01T17:30:00+0530",
        ] {
            assert_eq!(parse_observed_at(&json!(raw)).unwrap(), noon(), "{}", raw);
        }
    }

    #[test]
    fn test_fractional_seconds_kept() {
        let parsed = parse_observed_at(&json!("2024-01-01T12:00:00.250")).unwrap();
        assert_eq!(parsed, noon() + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_date_only_is_midnight() {
        let parsed = parse_observed_at(&json!("2024-01-01")).unwrap();
        assert_eq!(parsed, noon() - chrono::Duration::hours(12));
    }

    #[test]
    fn test_millis_timestamps() {
        assert_eq!(parse_observed_at(&json!(1704110400000_i64)).unwrap(), noon());
        assert_eq!(parse_observed_at(&json!(1704110400000.0)).unwrap(), noon());
        assert_eq!(parse_observed_at(&json!("1704110400000")).unwrap(), noon());
    }

    #[test]
    fn test_invalid_timestamps() {
        assert!(parse_observed_at(&json!("yesterday")).is_err());
        assert!(parse_observed_at(&json!("2024-13-01T00:00:00")).is_err());
        assert!(parse_observed_at(&json!(1704110400000.5)).is_err());
        assert!(parse_observed_at(&json!(null)).is_err());
        assert!(parse_observed_at(&json!("")).is_err());
        assert!(parse_observed_at(&json!(i64::MAX)).is_err());
    }

    #[test]
    fn test_storable_range_bounds() {
        let first = parse_observed_at(&json!("1000-01-01T00:00:00")).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(1000, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
        assert!(parse_observed_at(&json!("9999-12-31T23:59:59.999")).is_ok());

        for raw in [
            json!("0999-12-31T23:59:59.999"),
            json!("0005-01-01T00:00:00"),
            json!(-62000000000000_i64),
            json!(300000000000000_i64),
            json!("300000000000000"),
        ] {
            assert!(
                matches!(parse_observed_at(&raw), Err(RecordRejection::InvalidTimestamp(_))),
                "{}",
                raw
            );
        }
    }

    #[test]
    fn test_values() {
        assert_eq!(parse_value(&json!(4000.5)).unwrap(), 4000.5);
        assert_eq!(parse_value(&json!(4000)).unwrap(), 4000.0);
        assert_eq!(parse_value(&json!(" 4000.5 ")).unwrap(), 4000.5);
        assert_eq!(parse_value(&json!(0)).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_values() {
        for raw in [json!("n/a"), json!("NaN"), json!("inf"), json!(-1.5), json!("-2"), json!(true), json!(null)] {
            assert!(
                matches!(parse_value(&raw), Err(RecordRejection::InvalidValue(_))),
                "{}",
                raw
            );
        }
    }

    #[test]
    fn test_validate_pair() {
        let ts = json!("2024-01-01T12:00:00Z");
        let value = json!("4000.5");
        let record = validate(&RawPair {
            observed_at: &ts,
            value: &value,
        })
        .unwrap();

        assert_eq!(record, ExchangeRateRecord::new(noon(), 4000.5));
    }

    #[test]
    fn test_validate_reports_first_failure() {
        let ts = json!("not a date");
        let value = json!("also bad");
        let err = validate(&RawPair {
            observed_at: &ts,
            value: &value,
        })
        .unwrap_err();

        assert!(matches!(err, RecordRejection::InvalidTimestamp(_)));
    }
}
