use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Duration, Utc};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub const DEFAULT_GRACE_SECS: i64 = 5 * 60;

/// Grace allow-list: identifier to expiry instant.
///
/// One instance is created at startup and cloned (shared) into the
/// classifier and the interstitial arbiter. It is intentionally not
/// persisted, so protection is back on after every restart. A non-expired
/// entry is the only thing that suppresses interception.
#[derive(Clone)]
pub struct AllowList {
    entries: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    grace: Duration,
}

impl AllowList {
    pub fn new() -> Self {
        Self::with_grace(Duration::seconds(DEFAULT_GRACE_SECS))
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Grants passage until `now + grace`, replacing any existing entry.
    pub fn allow(&self, identifier: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let expiry = now
            .checked_add_signed(self.grace)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Lazy expiry: stale entries are dropped whenever we hold the write lock anyway.
        guard.retain(|_, until| now < *until);
        guard.insert(identifier.to_string(), expiry);
        log_debug!("Allowing {} until {}", identifier, expiry);
        expiry
    }

    pub fn is_allowed(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(identifier)
            .map(|until| now < *until)
            .unwrap_or(false)
    }

    pub fn expiry(&self, identifier: &str) -> Option<DateTime<Utc>> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(identifier).copied()
    }

    /// Removes one entry. Returns whether anything was removed.
    pub fn revoke(&self, identifier: &str) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = guard.remove(identifier).is_some();
        if removed {
            log_debug!("Revoked grace for {}", identifier);
        }
        removed
    }

    /// Clears every entry. Returns how many were removed.
    pub fn revoke_all(&self) -> usize {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let count = guard.len();
        guard.clear();
        log_debug!("Revoked all grace entries ({})", count);
        count
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::thread;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn grace_window_is_half_open() {
        let list = AllowList::new();
        list.allow("com.a", t0());

        assert!(list.is_allowed("com.a", t0()));
        assert!(list.is_allowed("com.a", t0() + Duration::seconds(299)));
        assert!(list.is_allowed(
            "com.a",
            t0() + Duration::minutes(5) - Duration::milliseconds(1)
        ));
        assert!(!list.is_allowed("com.a", t0() + Duration::minutes(5)));
        assert!(!list.is_allowed("com.a", t0() + Duration::days(30)));
    }

    #[test]
    fn unknown_identifier_is_not_allowed() {
        let list = AllowList::new();
        assert!(!list.is_allowed("com.unknown", t0()));
    }

    #[test]
    fn repeated_allows_overwrite_instead_of_stacking() {
        let list = AllowList::new();
        list.allow("com.a", t0());
        list.allow("com.a", t0() + Duration::minutes(1));

        assert_eq!(list.len(), 1);
        assert_eq!(list.expiry("com.a"), Some(t0() + Duration::minutes(6)));
        assert!(!list.is_allowed("com.a", t0() + Duration::minutes(6)));
    }

    #[test]
    fn revoke_removes_only_the_named_entry() {
        let list = AllowList::new();
        list.allow("com.a", t0());
        list.allow("com.b", t0());

        assert!(list.revoke("com.a"));
        assert!(!list.is_allowed("com.a", t0()));
        assert!(list.is_allowed("com.b", t0()));

        // absent entries are fine
        assert!(!list.revoke("com.nonexistent"));
    }

    #[test]
    fn revoke_all_clears_everything() {
        let list = AllowList::new();
        for id in ["com.a", "com.b", "com.c"] {
            list.allow(id, t0());
        }
        assert_eq!(list.revoke_all(), 3);
        assert!(list.is_empty());
        assert_eq!(list.revoke_all(), 0);
    }

    #[test]
    fn expired_entries_are_dropped_lazily() {
        let list = AllowList::new();
        list.allow("com.a", t0());
        list.allow("com.b", t0() + Duration::minutes(10));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn huge_grace_saturates_at_the_end_of_time() {
        let list = AllowList::with_grace(Duration::MAX);
        let expiry = list.allow("com.a", t0());

        assert_eq!(expiry, DateTime::<Utc>::MAX_UTC);
        assert!(list.is_allowed("com.a", t0() + Duration::days(365 * 1_000)));
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let list = AllowList::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let list = list.clone();
                thread::spawn(move || {
                    let id = format!("com.app{i}");
                    for _ in 0..500 {
                        list.allow(&id, t0());
                        assert!(list.expiry(&id).map_or(true, |e| e == t0() + list.grace()));
                        list.revoke(&id);
                    }
                    list.allow(&id, t0());
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(list.len(), 8);
    }
}
