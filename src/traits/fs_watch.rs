//! Change notification.

use crate::{FsError, PathPattern, Watcher};

/// Change notification of a virtual filesystem.
pub trait FsWatch: Send + Sync {
    /// Subscribe to the events whose path matches `filter`.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotSupported`] if the instance has no watch registry
    fn watch(&self, filter: PathPattern) -> Result<Watcher, FsError>;
}
