//! # rtl433-relay - rolling sensor aggregator for Prometheus
//!
//! Turns the JSON event stream of rtl_433 into a Prometheus scrape target.
//! Readings are kept in a short rolling log so a scrape shows every sensor
//! that reported recently, even if it transmits less often than the scrape
//! interval.
//!
//! ## Quick Start
//!
//! ```rust
//! use rtl433_relay::{Aggregator, Line, RelayConfig};
//!
//! let mut aggregator = Aggregator::new(RelayConfig::default()).unwrap();
//! let reader = aggregator.reader();
//! let renderer = aggregator.renderer();
//!
//! let now = 1_704_067_206.0;
//! aggregator.process_line(
//!     &Line::raw(r#"{"model":"Acme-T1","id":7,"temperature_C":21.5,"time":"2024-01-01T00:00:00Z"}"#),
//!     now,
//! );
//!
//! // Usually on another thread:
//! let text = renderer.render(&reader.snapshot(), now);
//! assert_eq!(text, "temperature_C{model=\"Acme-T1\",id=\"7\"} 21.5 1704067200000\n");
//! ```
//!
//! ## Modules
//!
//! - [`event`]: JSON line decoding and timestamps
//! - [`framing`]: syslog envelope stripping
//! - [`identity`]: device identity extraction
//! - [`novelty`]: repeat policy
//! - [`store`]: rolling log with lock-free snapshots
//! - [`render`]: Prometheus text exposition
//! - [`ingest`]: the single-writer ingestion loop
//! - [`source`]: stdin and UDP line sources

pub mod config;
pub mod error;
pub mod event;
pub mod framing;
pub mod identity;
pub mod ingest;
pub mod novelty;
pub mod render;
pub mod source;
pub mod store;

// Re-exports for convenient access
pub use config::{RelayConfig, RepeatPolicy, DEFAULT_PORT};
pub use error::{CoercionError, ConfigError, DecodeError, RelayError, Result};
pub use event::{Event, FieldValue};
pub use framing::Framing;
pub use identity::{IdValue, Identity, ID_FIELDS};
pub use ingest::{Aggregator, IngestStats, LineOutcome, MaintenanceReport, StatsSnapshot};
pub use novelty::{NoveltyFilter, Verdict};
pub use render::{MetricsRenderer, CONTENT_TYPE};
pub use source::{Funnel, Line};
pub use store::{LogEntry, LogReader, LogSnapshot, RollingLog};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_ingest_then_render() {
        let mut aggregator = Aggregator::new(RelayConfig::default()).unwrap();
        let reader = aggregator.reader();

        aggregator.process_line(&Line::raw(r#"{"id":1,"humidity":55}"#), 100.0);
        let text = aggregator.renderer().render(&reader.snapshot(), 101.0);

        assert!(text.starts_with("humidity{id=\"1\"} 55 "));
    }
}
