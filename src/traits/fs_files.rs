//! File entry operations: open, create, rename, remove.

use std::path::{Path, PathBuf};

use crate::{FileHandle, FsError, OpenFlags, Permissions};

/// File entry operations of a virtual filesystem.
///
/// Every path argument is normalized by the backend before lookup, so
/// `"a/b"`, `"/a/b/"` and `"/a/./b"` name the same entry.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`. Methods use `&self` to allow
/// concurrent access.
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `dyn FsFiles`.
pub trait FsFiles: Send + Sync {
    /// Open a file with explicit flags.
    ///
    /// With `flags.create` a missing file is created with `permissions`, and
    /// its missing parent directories are created too. The returned handle
    /// shares its content with every other handle on the same file.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the file is missing and `create` is not set
    /// - [`FsError::AlreadyExists`] if the file exists and `exclusive` is set
    /// - [`FsError::CannotOpenDirectory`] if the path is a directory
    /// - [`FsError::QuotaExceeded`] / [`FsError::FileCountExceeded`] when a
    ///   limit is reached
    /// - [`FsError::TooManyParallelCreations`] under creation contention
    fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        permissions: Permissions,
    ) -> Result<Box<dyn FileHandle>, FsError>;

    /// Create or truncate a file, opened for reading and writing.
    fn create(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsError> {
        self.open_file(path, OpenFlags::CREATE, Permissions::default_file())
    }

    /// Open an existing file for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>, FsError> {
        self.open_file(path, OpenFlags::READ, Permissions::default_file())
    }

    /// Move a file or a whole directory tree.
    ///
    /// Open handles follow the moved entries.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if `from` does not exist
    /// - [`FsError::AlreadyExists`] if `to` exists
    /// - [`FsError::InvalidPath`] if `to` lies inside `from`
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Remove a file or an empty directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the path does not exist
    /// - [`FsError::DirectoryNotEmpty`] for a directory with children
    /// - [`FsError::NotSupported`] for `/`
    fn remove(&self, path: &Path) -> Result<(), FsError>;

    /// Create a new file with a unique name in `dir`.
    fn temp_file(&self, dir: &Path, prefix: &str) -> Result<Box<dyn FileHandle>, FsError> {
        let name = format!("{prefix}{}", uuid::Uuid::now_v7().simple());
        self.open_file(&dir.join(name), OpenFlags::CREATE_NEW, Permissions::default_file())
    }

    /// Symbolic links are not supported.
    fn symlink(&self, _target: &Path, _link: &Path) -> Result<(), FsError> {
        Err(FsError::NotSupported {
            operation: "symlink",
        })
    }

    /// Symbolic links are not supported.
    fn readlink(&self, _link: &Path) -> Result<PathBuf, FsError> {
        Err(FsError::NotSupported {
            operation: "readlink",
        })
    }
}
