//! Coalesces bursts of filesystem events.
//!
//! A build step touching a deployed folder can fire dozens of events for
//! the same directory; only the last one matters.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Holds keys until they have been quiet for the configured duration.
#[derive(Debug)]
pub struct Debouncer<K> {
    pending: HashMap<K, Instant>,
    quiet: Duration,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            quiet: Duration::from_millis(debounce_ms),
        }
    }

    /// Record activity on `key`, restarting its timer.
    pub fn record(&mut self, key: K) {
        self.pending.insert(key, Instant::now());
    }

    pub fn remove(&mut self, key: &K) {
        self.pending.remove(key);
    }

    /// Drain keys that have been quiet long enough.
    pub fn take_ready(&mut self) -> Vec<K> {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&mut self, now: Instant) -> Vec<K> {
        let mut ready = Vec::new();
        self.pending.retain(|key, last| {
            if now.duration_since(*last) >= self.quiet {
                ready.push(key.clone());
                false
            } else {
                true
            }
        });
        ready
    }

    /// Drain everything regardless of age.
    pub fn flush(&mut self) -> Vec<K> {
        self.pending.drain().map(|(key, _)| key).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Time until the oldest pending key becomes ready.
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        self.pending
            .values()
            .map(|last| self.quiet.saturating_sub(now.duration_since(*last)))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread::sleep;

    #[test]
    fn test_key_ready_after_quiet_period() {
        let mut debouncer = Debouncer::new(40);
        let folder = PathBuf::from("/deploy/qml");
        debouncer.record(folder.clone());

        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(60));
        assert_eq!(debouncer.take_ready(), vec![folder]);
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn test_repeat_activity_restarts_timer() {
        let mut debouncer = Debouncer::new(50);
        let start = Instant::now();
        debouncer.record("a");
        debouncer.record("a");

        assert!(debouncer.take_ready_at(start).is_empty());
        assert_eq!(debouncer.take_ready_at(start + Duration::from_millis(200)), vec!["a"]);
    }

    #[test]
    fn test_flush_and_remove() {
        let mut debouncer = Debouncer::new(10_000);
        debouncer.record(1);
        debouncer.record(2);
        debouncer.remove(&1);

        assert_eq!(debouncer.flush(), vec![2]);
        assert!(debouncer.next_deadline().is_none());
    }
}
