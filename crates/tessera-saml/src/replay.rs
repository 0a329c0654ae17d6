//! Request identifier seen-set for replay attack prevention
//!
//! Every accepted `AuthnRequest` and `LogoutRequest` identifier is recorded
//! together with its issuer until the request could no longer pass the
//! freshness checks anyway.

use crate::error::{SamlError, SamlResult};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Default bound on the number of live entries
pub const DEFAULT_REPLAY_CAPACITY: usize = 100_000;

/// Bounded, time-windowed seen-set keyed by (issuer, request id).
#[derive(Debug)]
pub struct ReplayCache {
    seen: DashMap<(String, String), DateTime<Utc>>,
    capacity: usize,
    window: Duration,
}

impl ReplayCache {
    /// Entries expire `window` after the request's `IssueInstant`.
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            capacity,
            window,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a request identifier, failing if it is still live.
    ///
    /// # Errors
    ///
    /// - `SamlError::ReplayDetected` if the pair was seen and has not expired
    /// - `SamlError::ReplayCacheFull` if the cache is full of live entries
    pub fn check_and_record(
        &self,
        issuer: &str,
        request_id: &str,
        issue_instant: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SamlResult<()> {
        let key = (issuer.to_string(), request_id.to_string());
        let expires_at = issue_instant + self.window;

        if self.seen.len() >= self.capacity && !self.seen.contains_key(&key) {
            self.purge_expired(now);
            if self.seen.len() >= self.capacity {
                tracing::warn!(
                    capacity = self.capacity,
                    sp_entity_id = %issuer,
                    "Replay cache full, refusing request"
                );
                return Err(SamlError::ReplayCacheFull);
            }
        }

        match self.seen.entry(key) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    tracing::warn!(
                        sp_entity_id = %issuer,
                        request_id = %request_id,
                        "Replayed SAML request detected"
                    );
                    return Err(SamlError::ReplayDetected {
                        issuer: issuer.to_string(),
                        request_id: request_id.to_string(),
                    });
                }
                entry.insert(expires_at);
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
            }
        }
        Ok(())
    }

    /// Forget a recorded identifier so that the same request may be retried.
    pub fn release(&self, issuer: &str, request_id: &str) {
        self.seen
            .remove(&(issuer.to_string(), request_id.to_string()));
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, expires_at| *expires_at > now);
        let purged = before.saturating_sub(self.seen.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired replay cache entries");
        }
        purged
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_second_use_is_a_replay() {
        let cache = ReplayCache::new(10, Duration::minutes(10));
        cache.check_and_record("sp", "_1", t0(), t0()).unwrap();
        let err = cache.check_and_record("sp", "_1", t0(), t0()).unwrap_err();
        assert_eq!(err.reason_code(), "replay_detected");
    }

    #[test]
    fn test_same_id_from_another_issuer_is_distinct() {
        let cache = ReplayCache::new(10, Duration::minutes(10));
        cache.check_and_record("sp-a", "_1", t0(), t0()).unwrap();
        cache.check_and_record("sp-b", "_1", t0(), t0()).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entry_expires_after_window() {
        let cache = ReplayCache::new(10, Duration::minutes(10));
        cache.check_and_record("sp", "_1", t0(), t0()).unwrap();
        let later = t0() + Duration::minutes(11);
        assert!(cache.check_and_record("sp", "_1", t0(), later).is_ok());
    }

    #[test]
    fn test_full_cache_purges_then_fails_closed() {
        let cache = ReplayCache::new(2, Duration::minutes(10));
        cache.check_and_record("sp", "_1", t0(), t0()).unwrap();
        cache.check_and_record("sp", "_2", t0(), t0()).unwrap();

        let err = cache.check_and_record("sp", "_3", t0(), t0()).unwrap_err();
        assert!(matches!(err, SamlError::ReplayCacheFull));

        let later = t0() + Duration::minutes(11);
        cache.check_and_record("sp", "_3", later, later).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_released_id_can_be_used_again() {
        let cache = ReplayCache::new(10, Duration::minutes(10));
        cache.check_and_record("sp", "_1", t0(), t0()).unwrap();
        cache.release("sp", "_1");
        assert!(cache.check_and_record("sp", "_1", t0(), t0()).is_ok());
    }

    #[test]
    fn test_full_cache_still_reports_replay_for_known_id() {
        let cache = ReplayCache::new(1, Duration::minutes(10));
        cache.check_and_record("sp", "_1", t0(), t0()).unwrap();
        assert!(matches!(
            cache.check_and_record("sp", "_1", t0(), t0()),
            Err(SamlError::ReplayDetected { .. })
        ));
    }
}
