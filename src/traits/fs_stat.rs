//! Entry metadata queries.

use std::path::Path;

use crate::{FsError, Metadata, path};

/// Metadata queries of a virtual filesystem.
///
/// There are no symbolic links, so [`lstat`](FsStat::lstat) answers exactly
/// like [`stat`](FsStat::stat).
pub trait FsStat: Send + Sync {
    /// Metadata of the entry at `path`.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the path does not exist
    fn stat(&self, path: &Path) -> Result<Metadata, FsError>;

    /// Same as [`stat`](FsStat::stat).
    fn lstat(&self, path: &Path) -> Result<Metadata, FsError> {
        self.stat(path)
    }

    /// Join path elements with `/` and clean the result.
    fn join(&self, elements: &[&str]) -> String {
        path::join(elements)
    }
}
