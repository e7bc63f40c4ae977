//! Error types for the relay
//!
//! None of these are fatal to the ingestion loop: decode and coercion
//! failures are logged and the offending line or field is skipped.

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Line could not be turned into an event
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Field could not be coerced to a number
    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Line source I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while decoding a single input line
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not valid JSON
    #[error("Malformed JSON at line {line}, column {column}: {reason}")]
    Json {
        line: usize,
        column: usize,
        reason: String,
    },

    /// Payload is valid JSON but not an object
    #[error("Not an object: {0}")]
    NotAnObject(String),

    /// The `time` field could not be parsed
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Framed line carries no payload after its header
    #[error("Missing payload: expected {expected} header fields, got {actual}")]
    MissingPayload { expected: usize, actual: usize },
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json {
            line: e.line(),
            column: e.column(),
            reason: e.to_string(),
        }
    }
}

/// Errors while coercing a field value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoercionError {
    /// Value has no numeric interpretation
    #[error("{field} has non-numeric value {value}")]
    NonNumeric { field: String, value: String },
}

/// Errors in relay configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A duration knob is negative, NaN or infinite
    #[error("{name} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { name: &'static str, value: f64 },

    /// Backlog window longer than the max age
    #[error("backlog window ({backlog}s) exceeds max age ({max_age}s)")]
    BacklogExceedsMaxAge { backlog: f64, max_age: f64 },

    /// Maintenance would never run
    #[error("clean interval must be at least 1")]
    ZeroCleanInterval,

    /// Config file could not be parsed
    #[error("Invalid config file: {0}")]
    Parse(String),
}
