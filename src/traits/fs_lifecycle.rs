//! Closing a filesystem instance.

use crate::FsError;

/// Lifecycle of a filesystem instance.
///
/// After [`close`](FsLifecycle::close) every operation fails with
/// [`FsError::ClosedFilesystem`]. Watchers are closed, queued events dropped
/// and open handles closed.
pub trait FsLifecycle: Send + Sync {
    /// Close the instance. Closing twice fails with `ClosedFilesystem`.
    fn close(&self) -> Result<(), FsError>;

    /// Returns `true` once the instance is closed.
    fn is_closed(&self) -> bool;
}
