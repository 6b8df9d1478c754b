//! Directory operations for virtual filesystems.

use std::path::Path;

use crate::{DirEntry, FsError, Permissions};

/// Listing and creating directories.
///
/// Directory records carry no content; their children are whatever entries
/// sit one segment below them in the backend's index.
pub trait FsDir: Send + Sync {
    /// List the direct children of `path` in ascending name order.
    ///
    /// Opening the listing can fail as a whole. A single child whose record is
    /// listed in the index but cannot be loaded is reported as an `Err` item
    /// in its place, and the remaining children are still yielded.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if nothing exists at `path`
    /// - [`FsError::NotADirectory`] if `path` names a file
    /// - [`FsError::ClosedFilesystem`] after `close`
    fn read_dir(&self, path: &Path) -> Result<ReadDirIter, FsError>;

    /// Create `path` as a directory along with any missing ancestors.
    ///
    /// An existing directory at `path` is not an error. `permissions` apply
    /// to every directory created by the call.
    ///
    /// # Errors
    ///
    /// - [`FsError::AlreadyExists`] if `path` is a file
    /// - [`FsError::NotADirectory`] if some ancestor is a file
    fn mkdir_all(&self, path: &Path, permissions: Permissions) -> Result<(), FsError>;
}

/// Children of a directory, as returned by [`FsDir::read_dir`].
///
/// ```rust
/// use anyfs_store::{FsDir, FsError};
/// use std::path::Path;
///
/// fn child_names(fs: &dyn FsDir, dir: &Path) -> Result<Vec<String>, FsError> {
///     fs.read_dir(dir)?.map(|entry| entry.map(|e| e.name)).collect()
/// }
/// ```
pub struct ReadDirIter(Box<dyn Iterator<Item = Result<DirEntry, FsError>> + Send + 'static>);

impl ReadDirIter {
    /// Wrap a lazily produced listing.
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<DirEntry, FsError>> + Send + 'static,
    {
        Self(Box::new(iter))
    }

    /// Wrap a listing the backend already built under its lock.
    pub fn from_vec(entries: Vec<Result<DirEntry, FsError>>) -> Self {
        Self::new(entries.into_iter())
    }

    /// Gather every child, stopping at the first unreadable one.
    pub fn collect_all(self) -> Result<Vec<DirEntry>, FsError> {
        self.collect()
    }
}

impl Iterator for ReadDirIter {
    type Item = Result<DirEntry, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl std::fmt::Debug for ReadDirIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadDirIter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileType;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn entry(name: &str, file_type: FileType) -> DirEntry {
        DirEntry {
            name: name.into(),
            path: PathBuf::from(format!("/{name}")),
            file_type,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn missing(name: &str) -> FsError {
        FsError::CorruptedData {
            path: PathBuf::from(format!("/{name}")),
            details: "listed in index but record is absent".into(),
        }
    }

    #[test]
    fn unreadable_child_does_not_hide_its_siblings() {
        let listing: Vec<_> = ReadDirIter::from_vec(vec![
            Ok(entry("alpha", FileType::File)),
            Err(missing("beta")),
            Ok(entry("gamma", FileType::Directory)),
        ])
        .collect();

        assert_eq!(listing.len(), 3);
        assert!(listing[1].is_err());
        assert_eq!(listing[2].as_ref().map(|e| e.name.as_str()).ok(), Some("gamma"));
    }

    #[test]
    fn collect_all_reports_the_unreadable_child() {
        let result = ReadDirIter::from_vec(vec![Ok(entry("alpha", FileType::File)), Err(missing("beta"))])
            .collect_all();
        match result {
            Err(FsError::CorruptedData { path, .. }) => assert_eq!(path, PathBuf::from("/beta")),
            other => panic!("expected CorruptedData, got {other:?}"),
        }
    }

    #[test]
    fn lazy_listing_is_consumed_once() {
        let mut iter = ReadDirIter::new((0..2).map(|i| Ok(entry(&format!("f{i}"), FileType::File))));
        assert_eq!(iter.by_ref().count(), 2);
        assert!(iter.next().is_none());
        assert_eq!(format!("{iter:?}"), "ReadDirIter { .. }");
    }

    #[test]
    fn listing_can_cross_threads() {
        let iter = ReadDirIter::from_vec(vec![Ok(entry("alpha", FileType::File))]);
        let names = std::thread::spawn(move || iter.map(|e| e.map(|e| e.name)).collect::<Result<Vec<_>, _>>())
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(names, ["alpha"]);
    }
}
