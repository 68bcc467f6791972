//! Storage for authorization requests awaiting their callback.

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::authorize::PendingAuthorization;

/// Default lifetime of a pending authorization (10 minutes).
pub const DEFAULT_MAX_AGE_SECS: i64 = 600;

/// Default upper bound on concurrently pending authorizations.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Keeps pending authorizations keyed by `state`.
pub trait PendingAuthorizationStore: Send + Sync {
    /// Stores `pending` under its state.
    fn insert(&self, pending: PendingAuthorization);

    /// Removes and returns the authorization for `state`.
    ///
    /// Each state can be taken once.
    fn take(&self, state: &str) -> Option<PendingAuthorization>;
}

/// In-process [`PendingAuthorizationStore`].
///
/// Entries older than the configured max age are never returned. Inserting
/// drops expired entries, and once `capacity` live entries are held the
/// oldest one is evicted to make room.
#[derive(Debug)]
pub struct InMemoryPendingAuthorizationStore {
    entries: DashMap<String, PendingAuthorization>,
    max_age_secs: i64,
    capacity: usize,
}

impl InMemoryPendingAuthorizationStore {
    /// Creates a store with the default max age.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE_SECS)
    }

    /// Creates a store whose entries expire after `max_age_secs`.
    #[must_use]
    pub fn with_max_age(max_age_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            max_age_secs,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Caps the number of stored entries (at least one).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.key().clone());
        if let Some(state) = oldest {
            self.entries.remove(&state);
            warn!(capacity = self.capacity, "Pending authorization store full, evicted oldest entry");
        }
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.entries.len();
        self.entries
            .retain(|_, pending| !pending.is_expired_at(now, self.max_age_secs));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired pending authorizations");
        }
        removed
    }
}

impl Default for InMemoryPendingAuthorizationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingAuthorizationStore for InMemoryPendingAuthorizationStore {
    fn insert(&self, pending: PendingAuthorization) {
        self.purge_expired();
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&pending.state) {
            self.evict_oldest();
        }
        self.entries.insert(pending.state.clone(), pending);
    }

    fn take(&self, state: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.entries.remove(state)?;
        if pending.is_expired_at(OffsetDateTime::now_utc(), self.max_age_secs) {
            debug!("Pending authorization expired");
            return None;
        }
        Some(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(state: &str, created_at: OffsetDateTime) -> PendingAuthorization {
        PendingAuthorization {
            state: state.to_string(),
            nonce: None,
            pkce_verifier: None,
            redirect_uri: "https://app.example.com/cb".to_string(),
            created_at,
        }
    }

    #[test]
    fn test_take_once() {
        let store = InMemoryPendingAuthorizationStore::new();
        store.insert(pending("s1", OffsetDateTime::now_utc()));

        assert_eq!(store.take("s1").unwrap().state, "s1");
        assert!(store.take("s1").is_none());
        assert!(store.take("unknown").is_none());
    }

    #[test]
    fn test_expired_entries() {
        let store = InMemoryPendingAuthorizationStore::with_max_age(60);
        let old = OffsetDateTime::now_utc() - time::Duration::seconds(120);
        store.insert(pending("old", old));
        store.insert(pending("old2", old));
        store.insert(pending("fresh", OffsetDateTime::now_utc()));

        // each insert drops what has already expired
        assert_eq!(store.len(), 1);
        assert!(store.take("old").is_none());
        assert_eq!(store.purge_expired(), 0);
        assert!(store.take("fresh").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_entries_do_not_accumulate() {
        let store = InMemoryPendingAuthorizationStore::with_max_age(0);
        let created = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        for i in 0..1000 {
            store.insert(pending(&format!("s{i}"), created));
        }

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = InMemoryPendingAuthorizationStore::new().with_capacity(3);
        let now = OffsetDateTime::now_utc();
        for i in 0..5i64 {
            store.insert(pending(&format!("s{i}"), now - time::Duration::seconds(50 - i)));
        }

        assert_eq!(store.len(), 3);
        assert!(store.take("s0").is_none());
        assert!(store.take("s1").is_none());
        assert!(store.take("s2").is_some());
        assert!(store.take("s4").is_some());

        // re-inserting a known state replaces it in place
        store.insert(pending("s3", now));
        assert_eq!(store.len(), 1);
    }
}
