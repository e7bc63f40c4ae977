// rtl433 Relay Exporter - Self-instrumentation
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics describing the relay itself.
//!
//! Sensor readings are rendered by the relay core; these metrics cover the
//! ingestion pipeline and the scrape path, and are served on a separate
//! endpoint so they never mix with device series.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use rtl433_relay::StatsSnapshot;
use std::sync::Mutex;

lazy_static! {
    // ============================================================
    // Ingestion (mirrored from the aggregator counters)
    // ============================================================

    /// Lines received from all sources.
    pub static ref LINES: IntCounter = register_int_counter!(
        "rtl433_relay_lines_total",
        "Lines received from all sources"
    ).unwrap();

    /// Lines that could not be decoded.
    pub static ref DECODE_ERRORS: IntCounter = register_int_counter!(
        "rtl433_relay_decode_errors_total",
        "Lines that could not be decoded"
    ).unwrap();

    /// Events accepted by the repeat policy.
    pub static ref EVENTS_RETAINED: IntCounter = register_int_counter!(
        "rtl433_relay_events_retained_total",
        "Events accepted by the repeat policy"
    ).unwrap();

    /// Events dropped by the repeat policy.
    pub static ref EVENTS_SUPPRESSED: IntCounter = register_int_counter!(
        "rtl433_relay_events_suppressed_total",
        "Events dropped by the repeat policy"
    ).unwrap();

    /// Non-numeric fields dropped.
    pub static ref FIELDS_DROPPED: IntCounter = register_int_counter!(
        "rtl433_relay_fields_dropped_total",
        "Non-numeric fields dropped from retained events"
    ).unwrap();

    /// Log resets after a clock jump.
    pub static ref CLOCK_RESETS: IntCounter = register_int_counter!(
        "rtl433_relay_clock_resets_total",
        "Rolling log resets after a clock jump"
    ).unwrap();

    /// Entries removed by compaction.
    pub static ref ENTRIES_COMPACTED: IntCounter = register_int_counter!(
        "rtl433_relay_entries_compacted_total",
        "Entries removed from the rolling log by compaction"
    ).unwrap();

    /// Serializes mirroring so concurrent scrapes never double count.
    static ref MIRROR_LOCK: Mutex<()> = Mutex::new(());

    /// Current size of the rolling log.
    pub static ref LOG_ENTRIES: IntGauge = register_int_gauge!(
        "rtl433_relay_log_entries",
        "Entries currently held in the rolling log"
    ).unwrap();

    // ============================================================
    // Scrape path
    // ============================================================

    /// Sensor scrapes served.
    pub static ref SCRAPES_TOTAL: IntCounter = register_int_counter!(
        "rtl433_relay_scrapes_total",
        "Sensor metric scrapes served"
    ).unwrap();

    /// Lines in the most recent sensor scrape.
    pub static ref LAST_SCRAPE_SAMPLES: IntGauge = register_int_gauge!(
        "rtl433_relay_last_scrape_samples",
        "Samples in the most recent sensor scrape"
    ).unwrap();

    /// Render time of sensor scrapes.
    pub static ref RENDER_SECONDS: Histogram = register_histogram!(
        "rtl433_relay_render_seconds",
        "Time spent rendering a sensor scrape",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
    ).unwrap();
}

/// Register every metric up front so all of them show from the first scrape.
pub fn register_all() {
    lazy_static::initialize(&LINES);
    lazy_static::initialize(&DECODE_ERRORS);
    lazy_static::initialize(&EVENTS_RETAINED);
    lazy_static::initialize(&EVENTS_SUPPRESSED);
    lazy_static::initialize(&FIELDS_DROPPED);
    lazy_static::initialize(&CLOCK_RESETS);
    lazy_static::initialize(&ENTRIES_COMPACTED);
    lazy_static::initialize(&LOG_ENTRIES);
    lazy_static::initialize(&SCRAPES_TOTAL);
    lazy_static::initialize(&LAST_SCRAPE_SAMPLES);
    lazy_static::initialize(&RENDER_SECONDS);
}

/// Copy aggregator counters into the exported counters.
pub fn update_ingest_metrics(stats: &StatsSnapshot, log_entries: usize) {
    {
        let _guard = MIRROR_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        advance(&LINES, stats.lines);
        advance(&DECODE_ERRORS, stats.decode_errors);
        advance(&EVENTS_RETAINED, stats.events_retained);
        advance(&EVENTS_SUPPRESSED, stats.events_suppressed);
        advance(&FIELDS_DROPPED, stats.fields_dropped);
        advance(&CLOCK_RESETS, stats.clock_resets);
        advance(&ENTRIES_COMPACTED, stats.entries_compacted);
    }
    LOG_ENTRIES.set(saturating_i64(log_entries as u64));
}

/// Raise `counter` to `total`. Counters never go down.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

/// Record one sensor scrape.
pub fn record_scrape(render_secs: f64, samples: usize) {
    SCRAPES_TOTAL.inc();
    LAST_SCRAPE_SAMPLES.set(saturating_i64(samples as u64));
    RENDER_SECONDS.observe(render_secs);
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Content type of [`encode_metrics`] output.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Encode all self metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode self metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_i64() {
        assert_eq!(saturating_i64(5), 5);
        assert_eq!(saturating_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_encode_metrics() {
        let stats = StatsSnapshot {
            lines: 10,
            decode_errors: 2,
            ..Default::default()
        };
        update_ingest_metrics(&stats, 42);
        record_scrape(0.0002, 3);

        // Registry is process-wide and other tests update it too.
        let output = encode_metrics();
        assert!(output.contains("# TYPE rtl433_relay_lines_total counter"));
        assert!(output.contains("# TYPE rtl433_relay_decode_errors_total counter"));
        assert!(output.contains("# TYPE rtl433_relay_log_entries gauge"));
        assert!(output.contains("rtl433_relay_scrapes_total"));
        assert!(output.contains("rtl433_relay_render_seconds_bucket"));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let counter = IntCounter::new("test_advance_total", "advance").unwrap();

        advance(&counter, 10);
        assert_eq!(counter.get(), 10);

        // Same total twice: no double counting
        advance(&counter, 10);
        assert_eq!(counter.get(), 10);

        // A smaller total never lowers the counter
        advance(&counter, 4);
        assert_eq!(counter.get(), 10);

        advance(&counter, 15);
        assert_eq!(counter.get(), 15);
    }

    #[test]
    fn test_content_type() {
        assert!(content_type().starts_with("text/plain; version=0.0.4"));
    }
}
