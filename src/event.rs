//! Decoded sensor events.
//!
//! An [`Event`] is one JSON object emitted by rtl_433, flattened into a
//! field map. The optional `time` field is removed at decode time and
//! turned into epoch seconds.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{CoercionError, DecodeError};

/// Name of the embedded timestamp field.
pub const TIME_FIELD: &str = "time";

/// Longest JSON excerpt quoted in a decode error.
const EXCERPT_LEN: usize = 64;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A single field value as it arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    /// Nested array or object, kept as its JSON text.
    Other(String),
}

impl FieldValue {
    /// Numeric interpretation used for log entries.
    ///
    /// Booleans count as `1.0`/`0.0` and numeric strings are parsed;
    /// null and nested values have no numeric form.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Null | FieldValue::Other(_) => None,
        }
    }

    /// Integer interpretation used for identity fields.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            FieldValue::Bool(b) => Some(i64::from(*b)),
            FieldValue::Text(s) => s.trim().parse::<i64>().ok(),
            FieldValue::Null | FieldValue::Other(_) => None,
        }
    }

    /// Text interpretation used for identity fields.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Null | FieldValue::Other(_) => None,
        }
    }

    /// Like [`as_f64`](Self::as_f64), naming the field on failure.
    pub fn to_number(&self, field: &str) -> Result<f64, CoercionError> {
        self.as_f64().ok_or_else(|| CoercionError::NonNumeric {
            field: field.to_string(),
            value: self.to_string(),
        })
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Text(s),
            other @ (Value::Array(_) | Value::Object(_)) => FieldValue::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Null => f.write_str("null"),
            FieldValue::Other(json) => f.write_str(json),
        }
    }
}

/// Field map of one event, minus its timestamp.
pub type Fields = BTreeMap<String, FieldValue>;

/// One decoded sensor reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Epoch seconds.
    pub timestamp: f64,
    pub fields: Fields,
}

impl Event {
    pub fn new(timestamp: f64, fields: Fields) -> Self {
        Self { timestamp, fields }
    }

    /// Decode a JSON payload.
    ///
    /// `now` is used when the payload carries no `time` field, and to
    /// refine whole-second timestamps (see [`settle_timestamp`]).
    pub fn decode(payload: &str, now: f64) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(payload.trim())?;
        let map = match value {
            serde_json::Value::Object(map) => map,
            other => return Err(DecodeError::NotAnObject(excerpt(&other.to_string()))),
        };

        let mut fields: Fields = map
            .into_iter()
            .map(|(name, value)| (name, FieldValue::from(value)))
            .collect();

        let timestamp = match fields.remove(TIME_FIELD) {
            Some(value) => parse_timestamp(&value)?,
            None => now,
        };

        Ok(Self::new(settle_timestamp(timestamp, now), fields))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Convert a `time` field to epoch seconds.
///
/// Accepts RFC 3339 text (with `T` or a space between date and time),
/// naive date-times which are taken as local time, bare dates, and plain
/// numbers of epoch seconds.
pub fn parse_timestamp(value: &FieldValue) -> Result<f64, DecodeError> {
    let parsed = match value {
        FieldValue::Text(text) => parse_time_text(text),
        FieldValue::Int(i) => Some(*i as f64),
        FieldValue::Float(f) if f.is_finite() => Some(*f),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::InvalidTimestamp(value.to_string()))
}

fn parse_time_text(text: &str) -> Option<f64> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(epoch_secs(&dt));
    }
    if let Some((date, time)) = text.split_once(' ') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{}T{}", date, time)) {
            return Some(epoch_secs(&dt));
        }
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    // Nonexistent local times (DST gap) fall back to UTC.
    let secs = match Local.from_local_datetime(&naive).earliest() {
        Some(local) => epoch_secs(&local),
        None => epoch_secs(&Utc.from_utc_datetime(&naive)),
    };
    Some(secs)
}

fn epoch_secs<Tz: TimeZone>(dt: &DateTime<Tz>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9
}

/// Replace a truncated whole-second timestamp by `now`.
///
/// rtl_433 usually reports whole seconds. When such a timestamp is within
/// half a second either side of `now` it is the same moment, and the
/// precise wall clock reading is kept instead.
pub fn settle_timestamp(timestamp: f64, now: f64) -> f64 {
    if timestamp.fract() == 0.0 && (now - (timestamp + 0.5)).abs() < 1.0 {
        now
    } else {
        timestamp
    }
}

/// Current wall clock in epoch seconds.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
