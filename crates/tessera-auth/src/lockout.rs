//! Per-username failure counting with lockout and exponential backoff.
//!
//! Counters are keyed by the username as submitted, whether or not it
//! exists, so lockout behaves the same for known and unknown accounts.
//! Timestamps are monotonic (`Instant`) and passed in by the caller.

use crate::error::AuthFailure;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Exponential backoff between consecutive failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure, doubled after each further failure.
    #[serde(with = "duration_secs")]
    pub base: Duration,
    /// Upper bound for the delay.
    #[serde(with = "duration_secs")]
    pub cap: Duration,
}

/// Lockout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Consecutive failures that lock the username.
    pub max_failures: u32,
    /// How long a lock lasts before it is lifted automatically.
    #[serde(with = "duration_secs")]
    pub lockout_duration: Duration,
    /// Optional delay enforced between failures below the lock threshold.
    pub backoff: Option<BackoffPolicy>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lockout_duration: Duration::from_secs(15 * 60),
            backoff: None,
        }
    }
}

impl LockoutPolicy {
    /// List configuration problems, empty if the policy is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_failures == 0 {
            problems.push("lockout.max_failures must be at least 1".to_string());
        }
        if self.lockout_duration.is_zero() {
            problems.push("lockout.lockout_duration must be positive".to_string());
        }
        if let Some(backoff) = self.backoff {
            if backoff.base.is_zero() {
                problems.push("lockout.backoff.base must be positive".to_string());
            }
            if backoff.cap < backoff.base {
                problems.push("lockout.backoff.cap must not be below backoff.base".to_string());
            }
        }
        problems
    }

    fn backoff_after(&self, failures: u32) -> Option<Duration> {
        let backoff = self.backoff?;
        let exponent = failures.saturating_sub(1).min(16);
        Some(backoff.base.saturating_mul(1 << exponent).min(backoff.cap))
    }
}

/// Snapshot of a username's failure state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutStatus {
    pub is_locked: bool,
    pub failed_attempts: u32,
    pub max_attempts: u32,
    /// Time until the next attempt is accepted, if any wait applies.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct FailureEntry {
    failures: u32,
    /// Attempts admitted but not yet settled.
    in_flight: u32,
    last_failure: Instant,
    locked_until: Option<Instant>,
}

impl FailureEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            failures: 0,
            in_flight: 0,
            last_failure: now,
            locked_until: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.failures == 0 && self.in_flight == 0 && self.locked_until.is_none()
    }
}

/// Wait suggested when an attempt is refused because enough attempts are
/// already in flight to reach the lock threshold.
const IN_FLIGHT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Concurrent failure tracker.
#[derive(Debug, Default)]
pub struct FailureTracker {
    policy: LockoutPolicy,
    entries: DashMap<String, FailureEntry>,
}

/// An admitted authentication attempt.
///
/// Counts against the lock threshold until settled with [`Attempt::fail`]
/// or [`Attempt::succeed`]. Dropping it unsettled releases the slot without
/// counting a failure.
#[derive(Debug)]
#[must_use]
pub struct Attempt<'a> {
    tracker: &'a FailureTracker,
    username: String,
    settled: bool,
}

impl Attempt<'_> {
    /// Settle as a failed attempt.
    pub fn fail(mut self, now: Instant) -> LockoutStatus {
        self.settled = true;
        self.tracker.count_failure(&self.username, now, true)
    }

    /// Settle as a successful attempt, clearing the counter.
    pub fn succeed(mut self) {
        self.settled = true;
        self.tracker.clear(&self.username, true);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.release(&self.username);
        }
    }
}

impl FailureTracker {
    #[must_use]
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Reject the attempt if the username is locked or still backing off.
    ///
    /// An expired lock is lifted here and the counter starts over.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure::AccountLocked` with the remaining wait.
    pub fn check(&self, username: &str, now: Instant) -> Result<(), AuthFailure> {
        match self.entries.get_mut(username) {
            Some(mut entry) => self.admit(username, &mut *entry, now),
            None => Ok(()),
        }
    }

    /// Admit an attempt and hold its slot until it is settled.
    ///
    /// Admission and reservation happen under the same map entry lock, so
    /// concurrent attempts never evaluate more guesses than the threshold
    /// allows.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure::AccountLocked` while locked, backing off, or
    /// when the attempts in flight could already reach the threshold.
    pub fn reserve(&self, username: &str, now: Instant) -> Result<Attempt<'_>, AuthFailure> {
        let mut entry = self
            .entries
            .entry(username.to_string())
            .or_insert_with(|| FailureEntry::fresh(now));

        self.admit(username, &mut *entry, now)?;

        if entry.failures.saturating_add(entry.in_flight) >= self.policy.max_failures {
            return Err(AuthFailure::AccountLocked {
                retry_after: IN_FLIGHT_RETRY_AFTER,
            });
        }
        entry.in_flight += 1;

        Ok(Attempt {
            tracker: self,
            username: username.to_string(),
            settled: false,
        })
    }

    fn admit(&self, username: &str, entry: &mut FailureEntry, now: Instant) -> Result<(), AuthFailure> {
        if let Some(until) = entry.locked_until {
            if now < until {
                return Err(AuthFailure::AccountLocked {
                    retry_after: until - now,
                });
            }
            info!(username = %username, "Lockout expired, counter reset");
            entry.failures = 0;
            entry.last_failure = now;
            entry.locked_until = None;
            return Ok(());
        }

        if let Some(delay) = self.policy.backoff_after(entry.failures) {
            let ready_at = entry.last_failure + delay;
            if now < ready_at {
                return Err(AuthFailure::AccountLocked {
                    retry_after: ready_at - now,
                });
            }
        }

        Ok(())
    }

    /// Count a failed attempt, locking the username at the threshold.
    pub fn record_failure(&self, username: &str, now: Instant) -> LockoutStatus {
        self.count_failure(username, now, false)
    }

    fn count_failure(&self, username: &str, now: Instant, settles: bool) -> LockoutStatus {
        let mut entry = self
            .entries
            .entry(username.to_string())
            .or_insert_with(|| FailureEntry::fresh(now));

        if settles {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        entry.failures = entry.failures.saturating_add(1);
        entry.last_failure = now;

        if entry.failures >= self.policy.max_failures && entry.locked_until.is_none() {
            entry.locked_until = Some(now + self.policy.lockout_duration);
            warn!(
                username = %username,
                failed_attempts = entry.failures,
                lockout_secs = self.policy.lockout_duration.as_secs(),
                "Username locked after repeated failures"
            );
        }

        let retry_after = match entry.locked_until {
            Some(until) => Some(until.saturating_duration_since(now)),
            None => self.policy.backoff_after(entry.failures),
        };

        LockoutStatus {
            is_locked: entry.locked_until.is_some(),
            failed_attempts: entry.failures,
            max_attempts: self.policy.max_failures,
            retry_after,
        }
    }

    /// Clear the counter after a successful authentication.
    pub fn record_success(&self, username: &str) {
        self.clear(username, false);
    }

    fn clear(&self, username: &str, settles: bool) {
        if let Some(mut entry) = self.entries.get_mut(username) {
            if settles {
                entry.in_flight = entry.in_flight.saturating_sub(1);
            }
            entry.failures = 0;
            entry.locked_until = None;
        }
        self.entries.remove_if(username, |_, entry| entry.is_idle());
    }

    fn release(&self, username: &str) {
        if let Some(mut entry) = self.entries.get_mut(username) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        self.entries.remove_if(username, |_, entry| entry.is_idle());
    }

    /// Drop expired locks and counters that have been quiet for longer than
    /// the lockout duration (or the backoff cap, if longer). Returns how
    /// many usernames were forgotten.
    pub fn purge_stale(&self, now: Instant) -> usize {
        let quiet_window = self
            .policy
            .backoff
            .map_or(self.policy.lockout_duration, |b| b.cap.max(self.policy.lockout_duration));
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.in_flight > 0 {
                return true;
            }
            match entry.locked_until {
                Some(until) => now < until,
                None => now.saturating_duration_since(entry.last_failure) < quiet_window,
            }
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of usernames with tracked state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current state for a username.
    #[must_use]
    pub fn status(&self, username: &str, now: Instant) -> LockoutStatus {
        match self.entries.get(username) {
            Some(entry) => {
                let locked_until = entry.locked_until.filter(|until| now < *until);
                LockoutStatus {
                    is_locked: locked_until.is_some(),
                    failed_attempts: entry.failures,
                    max_attempts: self.policy.max_failures,
                    retry_after: locked_until.map(|until| until - now),
                }
            }
            None => LockoutStatus {
                is_locked: false,
                failed_attempts: 0,
                max_attempts: self.policy.max_failures,
                retry_after: None,
            },
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32) -> LockoutPolicy {
        LockoutPolicy {
            max_failures: max,
            lockout_duration: Duration::from_secs(60),
            backoff: None,
        }
    }

    #[test]
    fn test_locks_at_threshold() {
        let tracker = FailureTracker::new(policy(3));
        let t0 = Instant::now();

        assert!(!tracker.record_failure("user1", t0).is_locked);
        assert!(!tracker.record_failure("user1", t0).is_locked);
        let status = tracker.record_failure("user1", t0);
        assert!(status.is_locked);
        assert_eq!(status.failed_attempts, 3);

        let err = tracker.check("user1", t0 + Duration::from_secs(10)).unwrap_err();
        assert_eq!(
            err,
            AuthFailure::AccountLocked {
                retry_after: Duration::from_secs(50)
            }
        );
    }

    #[test]
    fn test_lock_lifts_after_duration() {
        let tracker = FailureTracker::new(policy(1));
        let t0 = Instant::now();
        tracker.record_failure("user1", t0);
        assert!(tracker.check("user1", t0).is_err());

        let later = t0 + Duration::from_secs(61);
        assert!(tracker.check("user1", later).is_ok());
        assert_eq!(tracker.status("user1", later).failed_attempts, 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let tracker = FailureTracker::new(policy(3));
        let t0 = Instant::now();
        tracker.record_failure("user1", t0);
        tracker.record_failure("user1", t0);
        tracker.record_success("user1");
        assert_eq!(tracker.status("user1", t0).failed_attempts, 0);
    }

    #[test]
    fn test_usernames_are_tracked_independently() {
        let tracker = FailureTracker::new(policy(1));
        let t0 = Instant::now();
        tracker.record_failure("user1", t0);
        assert!(tracker.check("user1", t0).is_err());
        assert!(tracker.check("user2", t0).is_ok());
    }

    #[test]
    fn test_exponential_backoff_between_failures() {
        let tracker = FailureTracker::new(LockoutPolicy {
            max_failures: 10,
            lockout_duration: Duration::from_secs(600),
            backoff: Some(BackoffPolicy {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(4),
            }),
        });
        let t0 = Instant::now();

        tracker.record_failure("user1", t0);
        assert!(tracker.check("user1", t0 + Duration::from_millis(500)).is_err());
        assert!(tracker.check("user1", t0 + Duration::from_secs(1)).is_ok());

        let t1 = t0 + Duration::from_secs(1);
        tracker.record_failure("user1", t1);
        assert!(tracker.check("user1", t1 + Duration::from_secs(1)).is_err());
        assert!(tracker.check("user1", t1 + Duration::from_secs(2)).is_ok());

        // Capped at 4s however many failures follow
        let t2 = t1 + Duration::from_secs(2);
        for _ in 0..5 {
            tracker.record_failure("user1", t2);
        }
        assert!(tracker.check("user1", t2 + Duration::from_secs(4)).is_ok());
    }

    #[test]
    fn test_reservations_count_toward_threshold() {
        let tracker = FailureTracker::new(policy(2));
        let t0 = Instant::now();

        let first = tracker.reserve("user1", t0).unwrap();
        let second = tracker.reserve("user1", t0).unwrap();
        assert!(tracker.reserve("user1", t0).unwrap_err().is_locked());

        first.fail(t0);
        second.fail(t0);
        assert!(tracker.status("user1", t0).is_locked);
    }

    #[test]
    fn test_dropped_reservation_is_released() {
        let tracker = FailureTracker::new(policy(1));
        let t0 = Instant::now();

        drop(tracker.reserve("user1", t0).unwrap());
        assert!(tracker.is_empty());
        tracker.reserve("user1", t0).unwrap().succeed();
        assert_eq!(tracker.status("user1", t0).failed_attempts, 0);
    }

    #[test]
    fn test_purge_stale_forgets_quiet_and_expired_entries() {
        let tracker = FailureTracker::new(policy(2));
        let t0 = Instant::now();

        tracker.record_failure("quiet", t0);
        tracker.record_failure("locked", t0);
        tracker.record_failure("locked", t0);
        let held = tracker.reserve("busy", t0).unwrap();

        assert_eq!(tracker.purge_stale(t0 + Duration::from_secs(30)), 0);
        assert_eq!(tracker.len(), 3);

        // Lock and quiet window are both 60s
        assert_eq!(tracker.purge_stale(t0 + Duration::from_secs(61)), 2);
        assert_eq!(tracker.len(), 1);

        held.fail(t0 + Duration::from_secs(61));
        assert_eq!(tracker.status("busy", t0).failed_attempts, 1);
    }

    #[test]
    fn test_purge_stale_keeps_counters_inside_backoff_cap() {
        let tracker = FailureTracker::new(LockoutPolicy {
            max_failures: 10,
            lockout_duration: Duration::from_secs(60),
            backoff: Some(BackoffPolicy {
                base: Duration::from_secs(30),
                cap: Duration::from_secs(120),
            }),
        });
        let t0 = Instant::now();
        tracker.record_failure("user1", t0);
        assert_eq!(tracker.purge_stale(t0 + Duration::from_secs(90)), 0);
        assert_eq!(tracker.purge_stale(t0 + Duration::from_secs(121)), 1);
    }

    #[test]
    fn test_policy_validation() {
        assert!(LockoutPolicy::default().validate().is_empty());
        let bad = LockoutPolicy {
            max_failures: 0,
            lockout_duration: Duration::ZERO,
            backoff: Some(BackoffPolicy {
                base: Duration::from_secs(5),
                cap: Duration::from_secs(1),
            }),
        };
        assert_eq!(bad.validate().len(), 3);
    }

    #[test]
    fn test_policy_deserializes_seconds() {
        let policy: LockoutPolicy =
            serde_json::from_str(r#"{"max_failures": 3, "lockout_duration": 30}"#).unwrap();
        assert_eq!(policy.max_failures, 3);
        assert_eq!(policy.lockout_duration, Duration::from_secs(30));
        assert!(policy.backoff.is_none());
    }
}
