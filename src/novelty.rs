//! Repeat policy for incoming events.
//!
//! The filter keeps, per identity, the timestamp it last used to decide
//! (see [`RepeatPolicy`] for what "last" means under each policy).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{RelayConfig, RepeatPolicy};
use crate::identity::Identity;

/// Outcome of a novelty check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retain,
    Suppress,
}

impl Verdict {
    pub fn is_retained(&self) -> bool {
        matches!(self, Verdict::Retain)
    }
}

/// Decides which events reach the rolling log.
#[derive(Debug)]
pub struct NoveltyFilter {
    policy: RepeatPolicy,
    min_repeat_secs: f64,
    last_seen: HashMap<Arc<Identity>, f64>,
}

impl NoveltyFilter {
    pub fn new(policy: RepeatPolicy, min_repeat_secs: f64) -> Self {
        Self {
            policy,
            min_repeat_secs,
            last_seen: HashMap::new(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.repeat_policy, config.min_repeat_secs)
    }

    pub fn policy(&self) -> RepeatPolicy {
        self.policy
    }

    /// Check an event for `identity` stamped `timestamp`, updating last-seen.
    pub fn check(&mut self, identity: &Arc<Identity>, timestamp: f64) -> Verdict {
        let previous = self.last_seen.get(identity.as_ref()).copied();

        match self.policy {
            RepeatPolicy::RetainAlways => {
                self.touch(identity, timestamp);
                Verdict::Retain
            }
            RepeatPolicy::RetainAfterInterval => match previous {
                Some(last) if timestamp - last < self.min_repeat_secs => Verdict::Suppress,
                _ => {
                    self.touch(identity, timestamp);
                    Verdict::Retain
                }
            },
            RepeatPolicy::ConfirmRepeat => {
                self.touch(identity, timestamp);
                match previous {
                    Some(last) if timestamp - last < self.min_repeat_secs => Verdict::Retain,
                    _ => Verdict::Suppress,
                }
            }
        }
    }

    /// Last-seen timestamp for `identity`, if tracked.
    pub fn last_seen(&self, identity: &Identity) -> Option<f64> {
        self.last_seen.get(identity).copied()
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Forget identities with no entries left in the log.
    ///
    /// Under policies that consult last-seen, an identity is kept until its
    /// repeat interval has also run out, so eviction never changes a verdict.
    /// Returns the number of identities removed.
    pub fn evict(&mut self, live: &HashSet<Arc<Identity>>, now: f64) -> usize {
        let before = self.last_seen.len();
        let needs_history = self.policy != RepeatPolicy::RetainAlways;
        let min_repeat = self.min_repeat_secs;

        self.last_seen.retain(|identity, last| {
            live.contains(identity.as_ref()) || (needs_history && now - *last < min_repeat)
        });

        before - self.last_seen.len()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.last_seen.clear();
    }

    fn touch(&mut self, identity: &Arc<Identity>, timestamp: f64) {
        self.last_seen
            .entry(Arc::clone(identity))
            .and_modify(|last| *last = last.max(timestamp))
            .or_insert(timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: i64) -> Arc<Identity> {
        Arc::new(Identity::default().with_text("model", "Acme-T1").with_int("id", id))
    }

    #[test]
    fn test_first_sighting_retained() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAlways, 3600.0);
        let id = device(1);
        assert_eq!(filter.check(&id, 100.0), Verdict::Retain);
        assert_eq!(filter.last_seen(&id), Some(100.0));
    }

    #[test]
    fn test_retain_always_never_drops() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAlways, 3600.0);
        let id = device(1);
        for i in 0..10 {
            let ts = 100.0 + i as f64;
            assert!(filter.check(&id, ts).is_retained());
            assert_eq!(filter.last_seen(&id), Some(ts));
        }
        // Past the interval too.
        assert!(filter.check(&id, 10_000.0).is_retained());
    }

    #[test]
    fn test_retain_after_interval() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAfterInterval, 60.0);
        let id = device(1);

        assert_eq!(filter.check(&id, 0.0), Verdict::Retain);
        assert_eq!(filter.check(&id, 30.0), Verdict::Suppress);
        assert_eq!(filter.check(&id, 59.9), Verdict::Suppress);
        // Suppressed events do not move last-seen.
        assert_eq!(filter.last_seen(&id), Some(0.0));
        assert_eq!(filter.check(&id, 60.0), Verdict::Retain);
        assert_eq!(filter.last_seen(&id), Some(60.0));
    }

    #[test]
    fn test_confirm_repeat() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::ConfirmRepeat, 3600.0);
        let id = device(1);

        assert_eq!(filter.check(&id, 0.0), Verdict::Suppress);
        assert_eq!(filter.check(&id, 30.0), Verdict::Retain);
        // Long silence: needs confirmation again.
        assert_eq!(filter.check(&id, 10_000.0), Verdict::Suppress);
        assert_eq!(filter.check(&id, 10_010.0), Verdict::Retain);
    }

    #[test]
    fn test_identities_are_independent() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAfterInterval, 60.0);
        assert!(filter.check(&device(1), 0.0).is_retained());
        assert!(filter.check(&device(2), 1.0).is_retained());
        assert!(!filter.check(&device(1), 2.0).is_retained());
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_out_of_order_keeps_latest() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAlways, 60.0);
        let id = device(1);
        filter.check(&id, 50.0);
        filter.check(&id, 40.0);
        assert_eq!(filter.last_seen(&id), Some(50.0));
    }

    #[test]
    fn test_evict_retain_always() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAlways, 3600.0);
        let live_id = device(1);
        filter.check(&live_id, 0.0);
        filter.check(&device(2), 0.0);

        let live: HashSet<_> = [Arc::clone(&live_id)].into_iter().collect();
        assert_eq!(filter.evict(&live, 10.0), 1);
        assert_eq!(filter.len(), 1);
        assert!(filter.last_seen(&live_id).is_some());
    }

    #[test]
    fn test_evict_waits_for_interval() {
        let mut filter = NoveltyFilter::new(RepeatPolicy::RetainAfterInterval, 3600.0);
        filter.check(&device(1), 0.0);

        let live = HashSet::new();
        assert_eq!(filter.evict(&live, 600.0), 0);
        assert_eq!(filter.evict(&live, 3600.0), 1);
        assert!(filter.is_empty());
    }
}
