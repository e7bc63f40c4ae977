//! Ingestion loop.
//!
//! The [`Aggregator`] is the single writer of the rolling log. For every
//! line it decodes an event, extracts the identity, consults the novelty
//! filter and appends the numeric fields. Every `clean_interval` events it
//! runs maintenance: clock-jump detection, compaction and last-seen
//! eviction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::RelayConfig;
use crate::error::{ConfigError, DecodeError};
use crate::event::{unix_now, Event};
use crate::identity::{split_identity, Identity};
use crate::novelty::{NoveltyFilter, Verdict};
use crate::render::MetricsRenderer;
use crate::source::Line;
use crate::store::{LogEntry, LogReader, RollingLog};

/// Ingestion counters, shared with the exposition side.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub lines: AtomicU64,
    pub decode_errors: AtomicU64,
    pub events_retained: AtomicU64,
    pub events_suppressed: AtomicU64,
    pub entries_appended: AtomicU64,
    pub fields_dropped: AtomicU64,
    pub compactions: AtomicU64,
    pub entries_compacted: AtomicU64,
    pub clock_resets: AtomicU64,
    pub identities_evicted: AtomicU64,
}

/// Plain copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub decode_errors: u64,
    pub events_retained: u64,
    pub events_suppressed: u64,
    pub entries_appended: u64,
    pub fields_dropped: u64,
    pub compactions: u64,
    pub entries_compacted: u64,
    pub clock_resets: u64,
    pub identities_evicted: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            lines: get(&self.lines),
            decode_errors: get(&self.decode_errors),
            events_retained: get(&self.events_retained),
            events_suppressed: get(&self.events_suppressed),
            entries_appended: get(&self.entries_appended),
            fields_dropped: get(&self.fields_dropped),
            compactions: get(&self.compactions),
            entries_compacted: get(&self.entries_compacted),
            clock_resets: get(&self.clock_resets),
            identities_evicted: get(&self.identities_evicted),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// What happened to one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Appended this many entries (possibly zero if nothing was numeric).
    Retained { entries: usize },
    /// Dropped by the novelty filter.
    Suppressed,
    /// Could not be decoded.
    Rejected(DecodeError),
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub clock_reset: bool,
    pub entries_compacted: usize,
    pub identities_evicted: usize,
}

/// Single-writer aggregator: owns the rolling log and the novelty filter.
pub struct Aggregator {
    config: RelayConfig,
    log: RollingLog,
    filter: NoveltyFilter,
    stats: Arc<IngestStats>,
    iterations: u64,
}

impl Aggregator {
    /// Create an aggregator with an empty log.
    pub fn new(config: RelayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            filter: NoveltyFilter::from_config(&config),
            log: RollingLog::new(),
            stats: Arc::new(IngestStats::default()),
            iterations: 0,
            config,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Read handle for the exposition side.
    pub fn reader(&self) -> LogReader {
        self.log.reader()
    }

    /// Renderer matching this aggregator's configuration.
    pub fn renderer(&self) -> MetricsRenderer {
        MetricsRenderer::from_config(&self.config)
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn log(&self) -> &RollingLog {
        &self.log
    }

    pub fn filter(&self) -> &NoveltyFilter {
        &self.filter
    }

    /// Consume lines until the source is exhausted, using the wall clock.
    pub fn run<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = Line>,
    {
        for line in lines {
            self.process_line(&line, unix_now());
        }
        debug!(
            iterations = self.iterations,
            entries = self.log.len(),
            "line source exhausted"
        );
    }

    /// Decode and ingest one line received at `now`.
    pub fn process_line(&mut self, line: &Line, now: f64) -> LineOutcome {
        bump(&self.stats.lines, 1);
        trace!(line = line.text.trim(), "received");

        let decoded = line
            .framing
            .payload(&line.text)
            .and_then(|payload| Event::decode(payload, now));

        match decoded {
            Ok(event) => self.process_event(event, now),
            Err(e) => {
                bump(&self.stats.decode_errors, 1);
                debug!(error = %e, "skipping undecodable line");
                LineOutcome::Rejected(e)
            }
        }
    }

    /// Ingest one decoded event.
    pub fn process_event(&mut self, event: Event, now: f64) -> LineOutcome {
        let (identity, event) = split_identity(event);
        let identity = Arc::new(identity);

        let outcome = match self.filter.check(&identity, event.timestamp) {
            Verdict::Suppress => {
                bump(&self.stats.events_suppressed, 1);
                trace!(%identity, "suppressed by repeat policy");
                LineOutcome::Suppressed
            }
            Verdict::Retain => {
                let entries = self.build_entries(&identity, event);
                let count = entries.len();
                self.log.append(entries);
                bump(&self.stats.events_retained, 1);
                bump(&self.stats.entries_appended, count as u64);
                LineOutcome::Retained { entries: count }
            }
        };

        self.iterations += 1;
        if self.iterations % self.config.clean_interval == 0 {
            self.maintain(now);
        }

        outcome
    }

    fn build_entries(&self, identity: &Arc<Identity>, event: Event) -> Vec<LogEntry> {
        let timestamp = event.timestamp;
        let mut entries = Vec::with_capacity(event.len());

        for (name, value) in event.fields {
            match value.to_number(&name) {
                Ok(number) => {
                    entries.push(LogEntry::new(timestamp, Arc::clone(identity), name, number))
                }
                Err(e) => {
                    bump(&self.stats.fields_dropped, 1);
                    debug!(%identity, error = %e, "dropping field");
                }
            }
        }
        entries
    }

    /// Clock-jump check, compaction and last-seen eviction.
    pub fn maintain(&mut self, now: f64) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        if self
            .log
            .detect_clock_jump(now, self.config.clock_jump_tolerance_secs)
        {
            warn!(now, "log timestamps implausible against the clock, dropping the log");
            bump(&self.stats.clock_resets, 1);
            report.clock_reset = true;
        }

        report.entries_compacted = self.log.compact(now, self.config.max_age_secs);
        bump(&self.stats.compactions, 1);
        bump(
            &self.stats.entries_compacted,
            report.entries_compacted as u64,
        );

        let live = self.log.snapshot().identities();
        report.identities_evicted = self.filter.evict(&live, now);
        bump(
            &self.stats.identities_evicted,
            report.identities_evicted as u64,
        );

        debug!(
            compacted = report.entries_compacted,
            evicted = report.identities_evicted,
            remaining = self.log.len(),
            tracked = self.filter.len(),
            "maintenance done"
        );
        report
    }
}
