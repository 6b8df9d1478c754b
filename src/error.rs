//! Error types for the AnyFS storage backends.

use std::path::PathBuf;

/// Every failure a backend, handle, snapshot or watcher can report.
///
/// Variants name the normalized path they concern, and the operation when one
/// path can fail in several ways.
///
/// # Examples
///
/// ```rust
/// use anyfs_store::FsError;
/// use std::path::PathBuf;
///
/// let err = FsError::DirectoryNotEmpty { path: PathBuf::from("/logs") };
/// assert_eq!(err.to_string(), "directory not empty: /logs");
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    // Entries
    /// Path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// Normalized path that was looked up.
        path: PathBuf,
    },

    /// The target of a create or rename is taken.
    #[error("{operation}: already exists: {path}")]
    AlreadyExists {
        /// Path already occupied.
        path: PathBuf,
        /// `create`, `rename` or `mkdir_all`, with detail when useful.
        operation: &'static str,
    },

    /// A file sits where a directory is needed.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The file in the way.
        path: PathBuf,
    },

    /// A directory was opened as a file.
    #[error("cannot open directory: {path}")]
    CannotOpenDirectory {
        /// The directory path.
        path: PathBuf,
    },

    /// `remove` was asked to delete a directory with children.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// Directory that still has children.
        path: PathBuf,
    },

    /// The path is not acceptable for the operation.
    #[error("invalid path: {path} ({reason})")]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: &'static str,
    },

    // Handle Errors
    /// The handle was not opened for reading.
    #[error("read not supported: {path}")]
    ReadNotSupported {
        /// Path of the file behind the handle.
        path: PathBuf,
    },

    /// The handle was not opened for writing.
    #[error("write not supported: {path}")]
    WriteNotSupported {
        /// Path of the file behind the handle.
        path: PathBuf,
    },

    /// The handle has already been closed.
    #[error("file closed: {path}")]
    FileClosed {
        /// Path of the file behind the handle.
        path: PathBuf,
    },

    /// Seek to a negative position.
    #[error("invalid seek: {path} (offset {offset})")]
    InvalidSeek {
        /// Path of the file behind the handle.
        path: PathBuf,
        /// The resulting offset that was rejected.
        offset: i64,
    },

    // Resource Limit Errors
    /// Byte quota exceeded.
    #[error("quota exceeded: limit {limit}, requested {requested}, usage {usage}")]
    QuotaExceeded {
        /// The quota limit.
        limit: u64,
        /// The amount requested.
        requested: u64,
        /// The current usage.
        usage: u64,
    },

    /// Maximum number of files reached.
    #[error("file count exceeded: limit {limit}")]
    FileCountExceeded {
        /// The file count limit.
        limit: u64,
    },

    /// Too many creations are running at the same time. Safe to retry.
    #[error("too many parallel file creations (limit {limit})")]
    TooManyParallelCreations {
        /// The parallel creation limit.
        limit: u32,
    },

    // Lifecycle Errors
    /// The filesystem is closing or closed.
    #[error("closed filesystem")]
    ClosedFilesystem,

    /// Another snapshot of the same filesystem is being taken.
    #[error("filesystem is already being snapshotted")]
    SnapshotInProgress,

    /// The filesystem is too large to be snapshotted.
    #[error("snapshot too large: {size} bytes (limit {limit})")]
    SnapshotTooLarge {
        /// Used bytes at the time of the attempt.
        size: u64,
        /// The maximum snapshotable size.
        limit: u64,
    },

    // Configuration
    /// Invalid configuration value.
    #[error("invalid configuration: {field} ({reason})")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    // Data Errors
    /// A stored record or blob does not match what the index promises.
    #[error("corrupted data: {path} ({details})")]
    CorruptedData {
        /// Entry whose record or content is damaged.
        path: PathBuf,
        /// What was wrong with it.
        details: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    // Backends
    /// The backend has no way to do this.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// Name of the refused operation.
        operation: &'static str,
    },

    /// Key-value transaction failure.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The host filesystem failed underneath a store.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// Step that failed, such as `read blob`.
        operation: &'static str,
        /// Host path, or the virtual path being served.
        path: PathBuf,
        /// Error from the host.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// Returns `true` for transient admission-control rejections that the
    /// caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FsError::TooManyParallelCreations { .. })
    }

    /// Wraps an I/O error with the operation and path it belongs to.
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FsError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Shorthand for [`FsError::NotFound`].
    pub(crate) fn not_found(path: impl Into<PathBuf>) -> Self {
        FsError::NotFound { path: path.into() }
    }

    /// Shorthand for [`FsError::AlreadyExists`].
    pub(crate) fn exists(path: impl Into<PathBuf>, operation: &'static str) -> Self {
        FsError::AlreadyExists {
            path: path.into(),
            operation,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound {
                path: PathBuf::new(),
            },
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: PathBuf::new(),
                operation: "io",
            },
            _ => FsError::Io {
                operation: "io",
                path: PathBuf::new(),
                source: error,
            },
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(error: FsError) -> Self {
        use std::io::ErrorKind;

        let kind = match &error {
            FsError::NotFound { .. } => ErrorKind::NotFound,
            FsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            FsError::InvalidSeek { .. } | FsError::InvalidPath { .. } => ErrorKind::InvalidInput,
            FsError::ReadNotSupported { .. } | FsError::WriteNotSupported { .. } => {
                ErrorKind::PermissionDenied
            }
            FsError::NotSupported { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}

impl From<serde_json::Error> for FsError {
    fn from(error: serde_json::Error) -> Self {
        FsError::Deserialization(error.to_string())
    }
}
