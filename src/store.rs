//! Rolling log of retained readings.
//!
//! The log is published as an immutable [`LogSnapshot`] behind an
//! [`ArcSwap`]. The single [`RollingLog`] owner builds each new state next
//! to the current one and swaps it in; [`LogReader`]s only ever load a
//! complete snapshot, so a render never observes a half-applied append or
//! compaction and never blocks the writer.
//!
//! Entries are stored in batches (one per append, normally one event).
//! Batches are grouped into sealed segments of [`SEGMENT_BATCHES`] plus an
//! open tail. An append republishes the tail only; the sealed segments are
//! shared with the previous snapshot, so publishing cost stays bounded no
//! matter how long the log grows.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::identity::Identity;

/// Batches per sealed segment.
pub const SEGMENT_BATCHES: usize = 64;

type Batch = Arc<[LogEntry]>;
type Segment = Arc<[Batch]>;

/// One retained reading.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Epoch seconds.
    pub timestamp: f64,
    pub identity: Arc<Identity>,
    pub variable: Arc<str>,
    pub value: f64,
}

impl LogEntry {
    pub fn new(
        timestamp: f64,
        identity: Arc<Identity>,
        variable: impl Into<Arc<str>>,
        value: f64,
    ) -> Self {
        Self {
            timestamp,
            identity,
            variable: variable.into(),
            value,
        }
    }
}

/// Immutable state of the log at one point in time.
#[derive(Debug)]
pub struct LogSnapshot {
    sealed: Arc<[Segment]>,
    tail: Vec<Batch>,
    len: usize,
}

impl Default for LogSnapshot {
    fn default() -> Self {
        Self {
            sealed: Arc::from(Vec::new()),
            tail: Vec::new(),
            len: 0,
        }
    }
}

/// Position of an entry: segment index (`sealed.len()` is the tail),
/// batch within it, entry within the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cut {
    segment: usize,
    batch: usize,
    offset: usize,
}

impl LogSnapshot {
    fn from_parts(sealed: Arc<[Segment]>, tail: Vec<Batch>) -> Self {
        let len = sealed
            .iter()
            .flat_map(|segment| segment.iter())
            .chain(tail.iter())
            .map(|batch| batch.len())
            .sum();
        Self { sealed, tail, len }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries oldest first. Use `.rev()` to walk newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.sealed
            .iter()
            .flat_map(|segment| segment.iter())
            .chain(self.tail.iter())
            .flat_map(|batch| batch.iter())
    }

    pub fn oldest(&self) -> Option<&LogEntry> {
        self.iter().next()
    }

    pub fn newest(&self) -> Option<&LogEntry> {
        self.iter().next_back()
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.oldest().map(|entry| entry.timestamp)
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.newest().map(|entry| entry.timestamp)
    }

    /// Identities that still have at least one entry.
    pub fn identities(&self) -> HashSet<Arc<Identity>> {
        self.iter()
            .map(|entry| Arc::clone(&entry.identity))
            .collect()
    }

    /// Number of sealed segments.
    pub fn sealed_segments(&self) -> usize {
        self.sealed.len()
    }

    /// Number of batches in the open tail.
    pub fn tail_batches(&self) -> usize {
        self.tail.len()
    }

    /// Whether both snapshots hold the very same sealed segment at `index`.
    pub fn shares_segment(&self, other: &LogSnapshot, index: usize) -> bool {
        match (self.sealed.get(index), other.sealed.get(index)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// This snapshot plus one batch at the end.
    fn with_batch(&self, batch: Batch) -> Self {
        let len = self.len + batch.len();
        let mut tail = Vec::with_capacity(self.tail.len() + 1);
        tail.extend(self.tail.iter().cloned());
        tail.push(batch);

        if tail.len() < SEGMENT_BATCHES {
            return Self {
                sealed: Arc::clone(&self.sealed),
                tail,
                len,
            };
        }

        let mut sealed = Vec::with_capacity(self.sealed.len() + 1);
        sealed.extend(self.sealed.iter().cloned());
        sealed.push(Segment::from(tail));
        Self {
            sealed: Arc::from(sealed),
            tail: Vec::new(),
            len,
        }
    }

    /// Position of the first entry with `timestamp >= horizon`.
    fn first_within(&self, horizon: f64) -> Option<Cut> {
        self.sealed
            .iter()
            .map(|segment| &segment[..])
            .chain(std::iter::once(&self.tail[..]))
            .enumerate()
            .find_map(|(segment_idx, batches)| {
                batches.iter().enumerate().find_map(|(batch_idx, batch)| {
                    batch
                        .iter()
                        .position(|entry| entry.timestamp >= horizon)
                        .map(|offset| Cut {
                            segment: segment_idx,
                            batch: batch_idx,
                            offset,
                        })
                })
            })
    }

    /// Everything from `cut` on. Untouched segments are shared.
    fn from_cut(&self, cut: Cut) -> Self {
        let trim = |batches: &[Batch]| -> Vec<Batch> {
            let first = &batches[cut.batch];
            let mut kept = Vec::with_capacity(batches.len() - cut.batch);
            if cut.offset == 0 {
                kept.push(Arc::clone(first));
            } else {
                kept.push(Batch::from(&first[cut.offset..]));
            }
            kept.extend(batches[cut.batch + 1..].iter().cloned());
            kept
        };

        if cut.segment == self.sealed.len() {
            return Self::from_parts(Arc::from(Vec::new()), trim(&self.tail));
        }

        let mut sealed = Vec::with_capacity(self.sealed.len() - cut.segment);
        sealed.push(Segment::from(trim(&self.sealed[cut.segment])));
        sealed.extend(self.sealed[cut.segment + 1..].iter().cloned());
        Self::from_parts(Arc::from(sealed), self.tail.clone())
    }
}

/// Read side of the log. Cheap to clone, safe to use from any thread.
#[derive(Debug, Clone)]
pub struct LogReader {
    shared: Arc<ArcSwap<LogSnapshot>>,
}

impl LogReader {
    /// Current snapshot. Holding it never blocks the writer.
    pub fn snapshot(&self) -> Arc<LogSnapshot> {
        self.shared.load_full()
    }

    pub fn len(&self) -> usize {
        self.shared.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write side of the log.
///
/// Deliberately not `Clone`: all mutation goes through the one owner.
#[derive(Debug)]
pub struct RollingLog {
    shared: Arc<ArcSwap<LogSnapshot>>,
}

impl Default for RollingLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ArcSwap::from_pointee(LogSnapshot::default())),
        }
    }

    /// A new read handle onto this log.
    pub fn reader(&self) -> LogReader {
        LogReader {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn snapshot(&self) -> Arc<LogSnapshot> {
        self.shared.load_full()
    }

    pub fn len(&self) -> usize {
        self.shared.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch of entries at the new end of the log.
    pub fn append(&mut self, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }

        let next = self.shared.load().with_batch(Batch::from(entries));
        self.shared.store(Arc::new(next));
    }

    /// Drop the longest prefix of entries older than `now - max_age_secs`.
    ///
    /// Stops at the first entry inside the horizon, even if older entries
    /// follow it. Returns the number of entries removed.
    pub fn compact(&mut self, now: f64, max_age_secs: f64) -> usize {
        let horizon = now - max_age_secs;
        let current = self.shared.load_full();

        let Some(cut) = current.first_within(horizon) else {
            let removed = current.len;
            if removed > 0 {
                self.shared.store(Arc::new(LogSnapshot::default()));
            }
            return removed;
        };

        if cut.batch == 0 && cut.offset == 0 && cut.segment == 0 {
            return 0;
        }

        let next = current.from_cut(cut);
        let removed = current.len - next.len;
        self.shared.store(Arc::new(next));
        removed
    }

    /// Reset the log if its timestamps are implausible relative to `now`.
    ///
    /// That is the case when the newest entry lies more than `tolerance_secs`
    /// in the future, or when the oldest entry is more than `tolerance_secs`
    /// newer than the newest (time went backwards while appending). Either
    /// way the log would never compact normally. Returns true on reset.
    pub fn detect_clock_jump(&mut self, now: f64, tolerance_secs: f64) -> bool {
        let current = self.shared.load();
        let (Some(oldest), Some(newest)) = (current.oldest_timestamp(), current.newest_timestamp())
        else {
            return false;
        };

        let ahead_of_clock = newest - now > tolerance_secs;
        let went_backwards = oldest - newest > tolerance_secs;
        if !(ahead_of_clock || went_backwards) {
            return false;
        }

        drop(current);
        self.clear();
        true
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let previous = self.shared.swap(Arc::new(LogSnapshot::default()));
        previous.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: f64, id: i64, value: f64) -> LogEntry {
        let identity = Arc::new(Identity::default().with_text("model", "T").with_int("id", id));
        LogEntry::new(ts, identity, "temperature_C", value)
    }

    fn timestamps(log: &RollingLog) -> Vec<f64> {
        log.snapshot().iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn test_log_new() {
        let log = RollingLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert!(log.snapshot().newest().is_none());
    }

    #[test]
    fn test_append() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1.0, 1, 20.0), entry(1.0, 1, 21.0)]);
        log.append(vec![entry(2.0, 2, 22.0)]);
        log.append(Vec::new());

        assert_eq!(log.len(), 3);
        assert_eq!(timestamps(&log), [1.0, 1.0, 2.0]);
        assert_eq!(log.snapshot().newest_timestamp(), Some(2.0));
        assert_eq!(log.snapshot().oldest_timestamp(), Some(1.0));
    }

    #[test]
    fn test_reader_sees_appends() {
        let mut log = RollingLog::new();
        let reader = log.reader();
        assert!(reader.is_empty());

        log.append(vec![entry(1.0, 1, 20.0)]);
        assert_eq!(reader.len(), 1);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1.0, 1, 20.0)]);
        let before = log.reader().snapshot();

        log.append(vec![entry(2.0, 1, 21.0)]);
        log.compact(1000.0, 10.0);

        assert_eq!(before.len(), 1);
        assert_eq!(before.newest().unwrap().value, 20.0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_compact_removes_prefix() {
        let mut log = RollingLog::new();
        for ts in [10.0, 20.0, 30.0, 40.0] {
            log.append(vec![entry(ts, 1, ts)]);
        }

        // Horizon 25: drops 10 and 20.
        assert_eq!(log.compact(35.0, 10.0), 2);
        assert_eq!(timestamps(&log), [30.0, 40.0]);
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut log = RollingLog::new();
        for ts in [10.0, 20.0, 30.0] {
            log.append(vec![entry(ts, 1, ts)]);
        }

        log.compact(35.0, 10.0);
        let once = timestamps(&log);
        assert_eq!(log.compact(35.0, 10.0), 0);
        assert_eq!(timestamps(&log), once);
    }

    #[test]
    fn test_compact_keeps_horizon_entry() {
        let mut log = RollingLog::new();
        log.append(vec![entry(25.0, 1, 0.0)]);
        assert_eq!(log.compact(35.0, 10.0), 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_compact_stops_at_first_young_entry() {
        let mut log = RollingLog::new();
        log.append(vec![entry(10.0, 1, 0.0)]);
        log.append(vec![entry(30.0, 1, 0.0)]);
        log.append(vec![entry(12.0, 1, 0.0)]);

        assert_eq!(log.compact(35.0, 10.0), 1);
        assert_eq!(timestamps(&log), [30.0, 12.0]);
    }

    #[test]
    fn test_compact_splits_batch() {
        let mut log = RollingLog::new();
        log.append(vec![entry(10.0, 1, 0.0), entry(30.0, 1, 1.0)]);

        assert_eq!(log.compact(35.0, 10.0), 1);
        assert_eq!(timestamps(&log), [30.0]);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_compact_everything() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1.0, 1, 0.0), entry(2.0, 2, 0.0)]);
        assert_eq!(log.compact(1000.0, 300.0), 2);
        assert!(log.is_empty());
        assert_eq!(log.compact(1000.0, 300.0), 0);
    }

    #[test]
    fn test_clock_jump_future_log() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1000.0, 1, 0.0)]);

        assert!(!log.detect_clock_jump(950.0, 60.0));
        assert!(log.detect_clock_jump(900.0, 60.0));
        assert!(log.is_empty());

        log.append(vec![entry(900.0, 1, 0.0)]);
        assert_eq!(timestamps(&log), [900.0]);
    }

    #[test]
    fn test_clock_jump_backwards_inside_log() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1000.0, 1, 0.0)]);
        log.append(vec![entry(500.0, 1, 0.0)]);

        assert!(log.detect_clock_jump(500.0, 60.0));
        assert!(log.is_empty());
    }

    #[test]
    fn test_clock_jump_empty_log() {
        let mut log = RollingLog::new();
        assert!(!log.detect_clock_jump(0.0, 60.0));
    }

    #[test]
    fn test_identities() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1.0, 1, 0.0), entry(1.0, 1, 1.0)]);
        log.append(vec![entry(2.0, 2, 0.0)]);

        let ids = log.snapshot().identities();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut log = RollingLog::new();
        log.append(vec![entry(1.0, 1, 0.0)]);
        assert_eq!(log.clear(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_spans_segments() {
        let mut log = RollingLog::new();
        let count = SEGMENT_BATCHES * 2 + 3;
        for i in 0..count {
            log.append(vec![entry(i as f64, 1, i as f64)]);
        }

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), count);
        assert_eq!(snapshot.sealed_segments(), 2);
        assert_eq!(snapshot.tail_batches(), 3);

        let expected: Vec<f64> = (0..count).map(|i| i as f64).collect();
        assert_eq!(timestamps(&log), expected);
        let newest_first: Vec<f64> = snapshot.iter().rev().take(2).map(|e| e.timestamp).collect();
        assert_eq!(newest_first, [(count - 1) as f64, (count - 2) as f64]);
    }

    #[test]
    fn test_append_republishes_tail_only() {
        let mut log = RollingLog::new();
        for i in 0..SEGMENT_BATCHES * 3 + 5 {
            log.append(vec![entry(i as f64, 1, 0.0)]);
        }
        let before = log.snapshot();

        // Appends short of the seal point leave sealed history shared
        for i in 0..SEGMENT_BATCHES - 6 {
            log.append(vec![entry(1e6 + i as f64, 2, 0.0)]);
            let after = log.snapshot();
            assert!(after.tail_batches() < SEGMENT_BATCHES);
            for segment in 0..3 {
                assert!(before.shares_segment(&after, segment));
            }
        }
    }

    #[test]
    fn test_append_many_batches() {
        let mut log = RollingLog::new();
        for i in 0..100_000 {
            log.append(vec![entry(i as f64, i % 10, 0.0)]);
        }

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 100_000);
        assert!(snapshot.tail_batches() < SEGMENT_BATCHES);
        assert_eq!(snapshot.newest_timestamp(), Some(99_999.0));
    }

    #[test]
    fn test_compact_across_segments() {
        let mut log = RollingLog::new();
        let count = SEGMENT_BATCHES * 3 + 10;
        for i in 0..count {
            log.append(vec![entry(i as f64, 1, 0.0)]);
        }
        let before = log.snapshot();

        // Horizon in the middle of the second segment
        let horizon = (SEGMENT_BATCHES + 17) as f64;
        assert_eq!(log.compact(horizon + 100.0, 100.0), SEGMENT_BATCHES + 17);

        let after = log.snapshot();
        assert_eq!(after.len(), count - SEGMENT_BATCHES - 17);
        assert_eq!(after.oldest_timestamp(), Some(horizon));
        assert_eq!(after.sealed_segments(), 2);
        assert_eq!(after.tail_batches(), 10);
        assert!(!after.shares_segment(&before, 1));

        // Appending after compaction keeps order
        log.append(vec![entry(count as f64, 1, 0.0)]);
        assert_eq!(log.snapshot().newest_timestamp(), Some(count as f64));
        assert_eq!(log.compact(horizon + 100.0, 100.0), 0);
    }

    #[test]
    fn test_compact_into_tail() {
        let mut log = RollingLog::new();
        let count = SEGMENT_BATCHES + 4;
        for i in 0..count {
            log.append(vec![entry(i as f64, 1, 0.0)]);
        }

        let removed = log.compact(SEGMENT_BATCHES as f64 + 2.0 + 10.0, 10.0);
        assert_eq!(removed, SEGMENT_BATCHES + 2);

        let snapshot = log.snapshot();
        assert_eq!(snapshot.sealed_segments(), 0);
        assert_eq!(snapshot.tail_batches(), 2);
        assert_eq!(timestamps(&log), [(count - 2) as f64, (count - 1) as f64]);
    }
}
