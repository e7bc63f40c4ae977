//! Line framing.
//!
//! rtl_433 `-F syslog` sends RFC 5424 datagrams:
//! `<PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD MSG`.
//! The JSON payload is the MSG part, i.e. everything after the seven
//! header tokens.

use crate::error::DecodeError;

/// Number of whitespace-delimited header tokens before the payload.
pub const SYSLOG_HEADER_FIELDS: usize = 7;

/// How a line from a source wraps its JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// The line is the payload.
    #[default]
    Raw,
    /// The payload follows a syslog header.
    Syslog,
}

impl Framing {
    /// Extract the JSON payload from a line.
    pub fn payload<'a>(&self, line: &'a str) -> Result<&'a str, DecodeError> {
        match self {
            Framing::Raw => Ok(line.trim()),
            Framing::Syslog => strip_syslog_header(line),
        }
    }
}

/// Return the message part of a syslog line.
pub fn strip_syslog_header(line: &str) -> Result<&str, DecodeError> {
    let missing = |actual: usize| DecodeError::MissingPayload {
        expected: SYSLOG_HEADER_FIELDS + 1,
        actual,
    };

    let mut rest = line.trim_start();
    for seen in 0..SYSLOG_HEADER_FIELDS {
        if rest.is_empty() {
            return Err(missing(seen));
        }
        match rest.find(char::is_whitespace) {
            Some(pos) => rest = rest[pos..].trim_start(),
            None => return Err(missing(seen + 1)),
        }
    }

    let payload = rest.trim_end();
    if payload.is_empty() {
        return Err(missing(SYSLOG_HEADER_FIELDS));
    }
    Ok(payload)
}
