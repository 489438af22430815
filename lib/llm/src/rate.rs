//! Sliding-window rate accounting for the key-selection capacity check
//! (§4.2 step 4), grounded in the source's `lib/integration/src/rate_limit.rs`
//! `RateLimiter` — generalized from a single per-integration window into
//! three independent windows (RPM, TPM, RPD) checked atomically together.
//!
//! **Open Question resolved:** RPD is tracked as its own independent sliding
//! 24h window (`window_seconds = 86_400`), not reset at a wall-clock
//! midnight boundary. A request is admitted only if RPM, TPM, and RPD all
//! have capacity simultaneously; `retry_after` is the maximum of the three
//! windows' reset times, since the request cannot proceed until the most
//! restrictive window clears.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tradeforge_core::KeyId;

/// Which budget a window enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Rpm,
    Tpm,
    Rpd,
}

impl WindowKind {
    #[must_use]
    pub const fn window_seconds(self) -> i64 {
        match self {
            Self::Rpm => 60,
            Self::Tpm => 60,
            Self::Rpd => 86_400,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowState {
    used: u64,
    window_start: DateTime<Utc>,
}

/// Outcome of a capacity check against one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdmission {
    pub admitted: bool,
    pub resets_at_secs: i64,
}

/// Seam for a shared counter store. The in-process implementation below is
/// what ships; a networked implementation (Redis, etc.) could implement the
/// same trait without the Router changing, which is the point of carrying
/// the seam even though only the in-process store is built.
pub trait RateStore: Send + Sync {
    /// Read-only admission check against `(key_id, kind)`'s window: reports
    /// whether `amount` more units would fit without mutating stored usage,
    /// even across a window rollover. Safe to call for every candidate key
    /// under consideration.
    fn check(&self, key_id: KeyId, kind: WindowKind, amount: u64, limit: u64, now: DateTime<Utc>) -> WindowAdmission;

    /// Commits `amount` units of usage against `(key_id, kind)`'s window,
    /// rolling the window over first if it has elapsed. Must be called only
    /// for the key selection actually uses, after every window has already
    /// been checked admitted.
    fn commit(&self, key_id: KeyId, kind: WindowKind, amount: u64, now: DateTime<Utc>);

    /// Whether this store is reachable. The Router falls open (switches to
    /// local-only counting) when this returns `false`.
    fn is_available(&self) -> bool {
        true
    }
}

/// The default, in-process rate store: one sliding window per
/// `(key_id, kind)`, behind a single `RwLock<HashMap<...>>`, mirroring the
/// source's `Arc<RwLock<HashMap<String, WindowState>>>` shape.
#[derive(Clone, Default)]
pub struct InMemoryRateStore {
    state: Arc<RwLock<HashMap<(KeyId, WindowKind), WindowState>>>,
}

impl InMemoryRateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InMemoryRateStore {
    /// Returns `(used, window_start)` as of `now`, without writing anything
    /// — if the stored window has already elapsed, reports the rolled-over
    /// state (`0`, `now`) it would have without persisting that rollover.
    fn effective_window(&self, key_id: KeyId, kind: WindowKind, now: DateTime<Utc>) -> (u64, DateTime<Utc>) {
        let window_duration = ChronoDuration::seconds(kind.window_seconds());
        let state = self.state.read().unwrap();
        match state.get(&(key_id, kind)) {
            Some(entry) if now - entry.window_start < window_duration => (entry.used, entry.window_start),
            _ => (0, now),
        }
    }
}

impl RateStore for InMemoryRateStore {
    fn check(&self, key_id: KeyId, kind: WindowKind, amount: u64, limit: u64, now: DateTime<Utc>) -> WindowAdmission {
        let window_duration = ChronoDuration::seconds(kind.window_seconds());
        let (used, window_start) = self.effective_window(key_id, kind, now);
        let resets_at = window_start + window_duration;
        let resets_at_secs = (resets_at - now).num_seconds().max(0);

        WindowAdmission {
            admitted: used.saturating_add(amount) <= limit,
            resets_at_secs,
        }
    }

    fn commit(&self, key_id: KeyId, kind: WindowKind, amount: u64, now: DateTime<Utc>) {
        let window_duration = ChronoDuration::seconds(kind.window_seconds());
        let mut state = self.state.write().unwrap();
        let entry = state.entry((key_id, kind)).or_insert(WindowState {
            used: 0,
            window_start: now,
        });

        if now - entry.window_start >= window_duration {
            entry.window_start = now;
            entry.used = 0;
        }
        entry.used += amount;
    }
}

/// Checks whether `(key_id)` has simultaneous capacity for `requests = 1`
/// and `tokens = estimated_tokens` across RPM, TPM, and RPD, without
/// mutating any window (used for dry-run filtering of every candidate key
/// before the random shuffle in key selection step 4-5). Returns `Ok(())`
/// if admitted, or the max `retry_after` across whichever windows rejected.
pub fn check_capacity(
    store: &dyn RateStore,
    key_id: KeyId,
    rpm_limit: u32,
    tpm_limit: u32,
    rpd_limit: u32,
    estimated_tokens: u32,
    now: DateTime<Utc>,
) -> Result<(), Duration> {
    let rpm = store.check(key_id, WindowKind::Rpm, 1, u64::from(rpm_limit), now);
    let tpm = store.check(key_id, WindowKind::Tpm, u64::from(estimated_tokens), u64::from(tpm_limit), now);
    let rpd = store.check(key_id, WindowKind::Rpd, 1, u64::from(rpd_limit), now);

    if rpm.admitted && tpm.admitted && rpd.admitted {
        return Ok(());
    }

    let max_retry = [rpm, tpm, rpd]
        .into_iter()
        .filter(|w| !w.admitted)
        .map(|w| w.resets_at_secs)
        .max()
        .unwrap_or(0);
    Err(Duration::from_secs(u64::try_from(max_retry).unwrap_or(0)))
}

/// Commits the usage a call against `key_id` actually incurs — `1` request
/// against RPM and RPD, `estimated_tokens` against TPM — once key selection
/// has settled on this key as the one it will use. Must only be called for
/// that one key, never for every candidate `check_capacity` merely
/// evaluated while filtering.
pub fn commit_usage(store: &dyn RateStore, key_id: KeyId, estimated_tokens: u32, now: DateTime<Utc>) {
    store.commit(key_id, WindowKind::Rpm, 1, now);
    store.commit(key_id, WindowKind::Tpm, u64::from(estimated_tokens), now);
    store.commit(key_id, WindowKind::Rpd, 1, now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_under_limit_and_rejects_over() {
        let store = InMemoryRateStore::new();
        let key_id = KeyId::new();
        let now = Utc::now();

        for _ in 0..5 {
            let admission = store.check(key_id, WindowKind::Rpm, 1, 5, now);
            assert!(admission.admitted);
            store.commit(key_id, WindowKind::Rpm, 1, now);
        }
        let rejected = store.check(key_id, WindowKind::Rpm, 1, 5, now);
        assert!(!rejected.admitted);
    }

    #[test]
    fn check_never_mutates_stored_usage() {
        let store = InMemoryRateStore::new();
        let key_id = KeyId::new();
        let now = Utc::now();

        for _ in 0..10 {
            assert!(store.check(key_id, WindowKind::Rpm, 1, 1, now).admitted);
        }
        // A rejected commit would have made this fail; repeated checks with
        // no commit never consume the budget.
        store.commit(key_id, WindowKind::Rpm, 1, now);
        assert!(!store.check(key_id, WindowKind::Rpm, 1, 1, now).admitted);
    }

    #[test]
    fn rpd_is_independent_sliding_window_not_midnight_reset() {
        let store = InMemoryRateStore::new();
        let key_id = KeyId::new();
        let t0 = Utc::now();

        assert!(store.check(key_id, WindowKind::Rpd, 1, 2, t0).admitted);
        store.commit(key_id, WindowKind::Rpd, 1, t0);
        assert!(store.check(key_id, WindowKind::Rpd, 1, 2, t0).admitted);
        store.commit(key_id, WindowKind::Rpd, 1, t0);
        let rejected = store.check(key_id, WindowKind::Rpd, 1, 2, t0 + ChronoDuration::hours(1));
        assert!(!rejected.admitted);

        // After a full 24h from window_start, the window rolls regardless
        // of wall-clock midnight.
        let admitted_again = store.check(key_id, WindowKind::Rpd, 1, 2, t0 + ChronoDuration::hours(25));
        assert!(admitted_again.admitted);
    }

    #[test]
    fn capacity_check_requires_all_three_windows() {
        let store = InMemoryRateStore::new();
        let key_id = KeyId::new();
        let now = Utc::now();

        // Exhaust TPM only.
        store.commit(key_id, WindowKind::Tpm, 1000, now);

        let result = check_capacity(&store, key_id, 100, 1000, 10_000, 1, now);
        assert!(result.is_err());
    }

    #[test]
    fn rejected_check_leaves_other_windows_uncommitted() {
        let store = InMemoryRateStore::new();
        let key_id = KeyId::new();
        let now = Utc::now();

        // TPM is already exhausted; RPM/RPD still have room.
        store.commit(key_id, WindowKind::Tpm, 1000, now);
        assert!(check_capacity(&store, key_id, 100, 1000, 10_000, 1, now).is_err());

        // The failed check must not have consumed RPM/RPD budget.
        assert!(store.check(key_id, WindowKind::Rpm, 100, 100, now).admitted);
        assert!(store.check(key_id, WindowKind::Rpd, 10_000, 10_000, now).admitted);
    }

    #[test]
    fn per_key_isolation() {
        let store = InMemoryRateStore::new();
        let key_a = KeyId::new();
        let key_b = KeyId::new();
        let now = Utc::now();

        store.commit(key_a, WindowKind::Rpm, 1, now);
        let a_rejected = store.check(key_a, WindowKind::Rpm, 1, 1, now);
        let b_admitted = store.check(key_b, WindowKind::Rpm, 1, 1, now);

        assert!(!a_rejected.admitted);
        assert!(b_admitted.admitted);
    }
}
