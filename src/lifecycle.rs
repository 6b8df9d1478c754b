//! Closing/closed state shared by the backends.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::FsError;

/// Two-phase close flag checked at the top of every public operation.
#[derive(Debug, Default)]
pub struct Lifecycle {
    closing: AtomicBool,
    closed: AtomicBool,
}

impl Lifecycle {
    /// Fail with `ClosedFilesystem` once closing has begun.
    #[inline]
    pub fn check(&self) -> Result<(), FsError> {
        if self.closing.load(Ordering::Acquire) {
            Err(FsError::ClosedFilesystem)
        } else {
            Ok(())
        }
    }

    /// Start closing. Returns `false` if another call already did.
    pub fn begin_close(&self) -> bool {
        self.closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the close as complete.
    pub fn finish_close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns `true` once closing has begun.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Returns `true` once closing has completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
