use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};

pub const DEFAULT_CAPACITY: usize = 100;

/// Short-horizon open counter: the most recent `capacity` open timestamps per
/// identifier, in insertion order. Callers pick the cutoff (last hour, since
/// midnight); this type only counts.
#[derive(Clone)]
pub struct RecentOpens {
    inner: Arc<Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>>,
    capacity: usize,
}

impl RecentOpens {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn record_open(&self, identifier: &str, now: DateTime<Utc>) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let opens = guard.entry(identifier.to_string()).or_default();
        opens.push_back(now);
        while opens.len() > self.capacity {
            opens.pop_front();
        }
    }

    /// Number of stored opens at or after `cutoff`.
    pub fn count_since(&self, identifier: &str, cutoff: DateTime<Utc>) -> usize {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(identifier)
            .map(|opens| opens.iter().filter(|ts| **ts >= cutoff).count())
            .unwrap_or(0)
    }

    pub fn stored(&self, identifier: &str) -> usize {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(identifier).map(VecDeque::len).unwrap_or(0)
    }
}

impl Default for RecentOpens {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn counts_at_or_after_cutoff() {
        let opens = RecentOpens::new();
        opens.record_open("com.a", t(0));
        opens.record_open("com.a", t(100));
        opens.record_open("com.a", t(200));
        opens.record_open("com.b", t(200));

        assert_eq!(opens.count_since("com.a", t(100)), 2);
        assert_eq!(opens.count_since("com.a", t(0)), 3);
        assert_eq!(opens.count_since("com.a", t(201)), 0);
        assert_eq!(opens.count_since("com.unknown", t(0)), 0);
    }

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let opens = RecentOpens::new();
        for i in 0..150 {
            opens.record_open("com.a", t(i));
        }
        assert_eq!(opens.stored("com.a"), DEFAULT_CAPACITY);
        // The oldest 50 were dropped.
        assert_eq!(opens.count_since("com.a", t(0)), 100);
        assert_eq!(opens.count_since("com.a", t(50)), 100);
        assert_eq!(opens.count_since("com.a", t(51)), 99);
    }

    #[test]
    fn clones_share_state() {
        let opens = RecentOpens::with_capacity(3);
        let other = opens.clone();
        other.record_open("com.a", t(0));
        assert_eq!(opens.count_since("com.a", t(0) - Duration::seconds(1)), 1);
    }
}
