//! Point-in-time captures.

use crate::snapshot::{Snapshot, SnapshotConfig};
use crate::FsError;

/// Point-in-time snapshotting of a virtual filesystem.
pub trait FsSnapshot: Send + Sync {
    /// Capture the entries accepted by `config` and their ancestors.
    ///
    /// Content of files open for writing is flushed first. Readers and
    /// writers keep operating once the capture is built.
    ///
    /// # Errors
    ///
    /// - [`FsError::SnapshotInProgress`] if another snapshot is being taken
    /// - [`FsError::SnapshotTooLarge`] if the backend refuses the size
    fn take_snapshot(&self, config: &SnapshotConfig) -> Result<Snapshot, FsError>;
}
