//! Admission control: byte and count quotas, the parallel-creation limiter
//! and the single-snapshot flag.
//!
//! All counters are atomics adjusted *before* the operation they gate and
//! rolled back when the operation fails, so that the hot creation and write
//! paths never serialize on a backend's structural lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::FsError;

/// A counter with an upper bound, reserved speculatively.
#[derive(Debug)]
pub struct Quota {
    used: AtomicU64,
    limit: u64,
}

impl Quota {
    /// Create an empty quota.
    pub fn new(limit: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            limit,
        }
    }

    /// The configured limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Current usage.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Reserve `amount` units.
    ///
    /// On failure the counter is restored and `QuotaExceeded` is returned.
    pub fn reserve(&self, amount: u64) -> Result<(), FsError> {
        if amount == 0 {
            return Ok(());
        }
        let previous = self.used.fetch_add(amount, Ordering::AcqRel);
        if previous.saturating_add(amount) > self.limit {
            self.used.fetch_sub(amount, Ordering::AcqRel);
            return Err(FsError::QuotaExceeded {
                limit: self.limit,
                requested: amount,
                usage: previous,
            });
        }
        Ok(())
    }

    /// Give back `amount` units.
    pub fn release(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        // Saturate instead of wrapping if bookkeeping ever drifts.
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(amount))
            });
    }

    /// Reserve `amount` units, released when the guard is dropped unless
    /// [`QuotaReservation::commit`] is called.
    pub fn reserve_scoped(&self, amount: u64) -> Result<QuotaReservation<'_>, FsError> {
        self.reserve(amount)?;
        Ok(QuotaReservation {
            quota: self,
            amount,
            committed: false,
        })
    }

    pub(crate) fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::Release);
    }
}

/// A pending quota reservation.
#[derive(Debug)]
#[must_use = "dropping the reservation releases it"]
pub struct QuotaReservation<'a> {
    quota: &'a Quota,
    amount: u64,
    committed: bool,
}

impl QuotaReservation<'_> {
    /// Keep the reserved units charged.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.quota.release(self.amount);
        }
    }
}

/// Bounds the number of creations running at the same time.
#[derive(Debug)]
pub struct CreationLimiter {
    pending: AtomicU32,
    limit: u32,
}

impl CreationLimiter {
    /// Create a limiter admitting `limit` concurrent creations.
    pub fn new(limit: u32) -> Self {
        Self {
            pending: AtomicU32::new(0),
            limit,
        }
    }

    /// Number of creations currently admitted.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Admit one creation or fail with `TooManyParallelCreations`.
    ///
    /// The returned permit releases its slot on drop, on every exit path.
    pub fn acquire(&self) -> Result<CreationPermit<'_>, FsError> {
        let permit = CreationPermit { limiter: self };
        if self.pending.fetch_add(1, Ordering::AcqRel) + 1 > self.limit {
            return Err(FsError::TooManyParallelCreations { limit: self.limit });
        }
        Ok(permit)
    }
}

/// One admitted creation.
#[derive(Debug)]
pub struct CreationPermit<'a> {
    limiter: &'a CreationLimiter,
}

impl Drop for CreationPermit<'_> {
    fn drop(&mut self) {
        self.limiter.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Allows a single snapshot at a time.
#[derive(Debug, Default)]
pub struct SnapshotFlag(AtomicBool);

impl SnapshotFlag {
    /// Mark a snapshot as running or fail with `SnapshotInProgress`.
    pub fn begin(&self) -> Result<SnapshotGuard<'_>, FsError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FsError::SnapshotInProgress)?;
        Ok(SnapshotGuard(self))
    }

    /// Returns `true` while a snapshot is running.
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the [`SnapshotFlag`] on drop.
#[derive(Debug)]
pub struct SnapshotGuard<'a>(&'a SnapshotFlag);

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        (self.0).0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_within_limit() {
        let quota = Quota::new(100);
        quota.reserve(60).unwrap();
        quota.reserve(40).unwrap();
        assert_eq!(quota.used(), 100);
    }

    #[test]
    fn failed_reserve_leaves_counter_unchanged() {
        let quota = Quota::new(1000);
        quota.reserve(10).unwrap();
        let err = quota.reserve(2000).unwrap_err();
        assert!(matches!(
            err,
            FsError::QuotaExceeded {
                limit: 1000,
                requested: 2000,
                usage: 10
            }
        ));
        assert_eq!(quota.used(), 10);
    }

    #[test]
    fn release_saturates_at_zero() {
        let quota = Quota::new(10);
        quota.reserve(5).unwrap();
        quota.release(8);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn dropped_reservation_is_released() {
        let quota = Quota::new(10);
        {
            let _reservation = quota.reserve_scoped(4).unwrap();
            assert_eq!(quota.used(), 4);
        }
        assert_eq!(quota.used(), 0);

        quota.reserve_scoped(4).unwrap().commit();
        assert_eq!(quota.used(), 4);
    }

    #[test]
    fn limiter_rejects_above_limit_and_releases_on_drop() {
        let limiter = CreationLimiter::new(2);
        let a = limiter.acquire().unwrap();
        let _b = limiter.acquire().unwrap();
        assert!(matches!(
            limiter.acquire(),
            Err(FsError::TooManyParallelCreations { limit: 2 })
        ));
        assert_eq!(limiter.pending(), 2);
        drop(a);
        assert!(limiter.acquire().is_ok());
        assert_eq!(limiter.pending(), 1);
    }

    #[test]
    fn snapshot_flag_allows_one_at_a_time() {
        let flag = SnapshotFlag::default();
        let guard = flag.begin().unwrap();
        assert!(matches!(flag.begin(), Err(FsError::SnapshotInProgress)));
        drop(guard);
        assert!(!flag.is_active());
        assert!(flag.begin().is_ok());
    }
}
