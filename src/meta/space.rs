//! Usable-space accounting of the metadata-indexed backend.
//!
//! The used space is the sum of the blob sizes. Summing it means listing the
//! blob store, so the total is cached and recomputed at most every
//! [`META_USED_SPACE_CHECK_INTERVAL`], or right away for a growth of at least
//! [`META_ALWAYS_CHECK_THRESHOLD`] bytes.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use crate::FsError;
use crate::config::{META_ALWAYS_CHECK_THRESHOLD, META_USED_SPACE_CHECK_INTERVAL};
use crate::meta::blob::BlobStore;

#[derive(Debug)]
struct Cache {
    used: u64,
    checked_at: Option<Instant>,
}

/// Cached used-space counter checked against a limit.
#[derive(Debug)]
pub struct UsedSpace {
    limit: u64,
    cache: Mutex<Cache>,
}

impl UsedSpace {
    /// Counter with nothing measured yet.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            cache: Mutex::new(Cache {
                used: 0,
                checked_at: None,
            }),
        }
    }

    /// The usable-space limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Sum the blob sizes now.
    pub fn refresh(&self, blobs: &dyn BlobStore) -> Result<u64, FsError> {
        let mut cache = self.cache.lock();
        measure(&mut cache, blobs)
    }

    /// Used space, recomputed if the cached value is stale.
    pub fn current(&self, blobs: &dyn BlobStore) -> Result<u64, FsError> {
        let mut cache = self.cache.lock();
        if is_stale(&cache) {
            measure(&mut cache, blobs)
        } else {
            Ok(cache.used)
        }
    }

    /// Account for `growth` new bytes.
    ///
    /// # Errors
    ///
    /// - [`FsError::QuotaExceeded`] if the growth does not fit; nothing is
    ///   accounted
    pub fn admit(&self, blobs: &dyn BlobStore, growth: u64) -> Result<(), FsError> {
        let mut cache = self.cache.lock();
        if growth >= META_ALWAYS_CHECK_THRESHOLD || is_stale(&cache) {
            measure(&mut cache, blobs)?;
        }
        if cache.used.saturating_add(growth) > self.limit {
            return Err(FsError::QuotaExceeded {
                limit: self.limit,
                requested: growth,
                usage: cache.used,
            });
        }
        cache.used += growth;
        Ok(())
    }

    /// Account for `amount` freed bytes.
    pub fn release(&self, amount: u64) {
        let mut cache = self.cache.lock();
        cache.used = cache.used.saturating_sub(amount);
    }
}

fn is_stale(cache: &Cache) -> bool {
    cache
        .checked_at
        .is_none_or(|at| at.elapsed() >= META_USED_SPACE_CHECK_INTERVAL)
}

fn measure(cache: &mut Cache, blobs: &dyn BlobStore) -> Result<u64, FsError> {
    let used = blobs.list()?.iter().map(|blob| blob.size).sum();
    trace!(used, "measured used space");
    cache.used = used;
    cache.checked_at = Some(Instant::now());
    Ok(used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::blob::MemoryBlobStore;

    #[test]
    fn admit_within_limit_and_reject_above() {
        let blobs = MemoryBlobStore::new();
        let space = UsedSpace::new(100);
        space.admit(&blobs, 60).unwrap();
        let err = space.admit(&blobs, 50).unwrap_err();
        assert!(matches!(
            err,
            FsError::QuotaExceeded {
                limit: 100,
                requested: 50,
                usage: 60
            }
        ));
        space.release(60);
        space.admit(&blobs, 50).unwrap();
    }

    #[test]
    fn first_use_measures_blobs() {
        let blobs = MemoryBlobStore::new();
        blobs.create("a").unwrap().write_at(&[0; 30], 0).unwrap();
        let space = UsedSpace::new(100);
        assert_eq!(space.current(&blobs).unwrap(), 30);
        assert!(space.admit(&blobs, 80).is_err());
    }

    #[test]
    fn large_growth_always_remeasures() {
        let blobs = MemoryBlobStore::new();
        let space = UsedSpace::new(10_000_000);
        space.admit(&blobs, 10).unwrap();
        space.admit(&blobs, META_ALWAYS_CHECK_THRESHOLD).unwrap();
        // The measured blobs are empty, so the earlier 10 bytes were dropped.
        assert_eq!(space.current(&blobs).unwrap(), META_ALWAYS_CHECK_THRESHOLD);
    }
}
