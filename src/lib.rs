//! # anyfs-store
//!
//! Storage backends for the **AnyFS pluggable virtual filesystem**, with
//! point-in-time snapshots and change watching.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use anyfs_store::{FsExt, FsFiles, FsSnapshot, MemoryConfig, MemoryFs, SnapshotConfig};
//! use std::path::Path;
//!
//! let fs = MemoryFs::new(MemoryConfig::default()).unwrap();
//! fs.write_file(Path::new("/docs/readme.md"), b"# hello").unwrap();
//!
//! let snapshot = fs.take_snapshot(&SnapshotConfig::all()).unwrap();
//! fs.remove(Path::new("/docs/readme.md")).unwrap();
//!
//! let restored = snapshot.new_adapted_filesystem(0).unwrap();
//! assert_eq!(restored.read_file(Path::new("/docs/readme.md")).unwrap(), b"# hello");
//! ```
//!
//! ---
//!
//! ## Backends
//!
//! | Backend | Entries | Content | Limits |
//! |---------|---------|---------|--------|
//! | [`MemoryFs`] | ordered map in memory | one buffer per file | byte quota |
//! | [`MetaFs`] | JSON records in a [`KvStore`](meta::KvStore) | one blob per file in a [`BlobStore`](meta::BlobStore) | usable space, file count, parallel creations |
//!
//! Both implement [`VirtualFs`], so code written against the traits runs on
//! either.
//!
//! ---
//!
//! ## Trait Hierarchy
//!
//! ```text
//! Core:     FsFiles + FsDir + FsStat = Fs
//!                                      ↓
//! Virtual:  Fs + FsLifecycle + FsSnapshot + FsWatch = VirtualFs
//! ```
//!
//! Composite traits have **blanket implementations**, and every [`Fs`]
//! gets the whole-file helpers of [`FsExt`].
//!
//! ---
//!
//! ## Paths
//!
//! Paths are absolute, `/`-separated, and normalized before use: `"a/b"`,
//! `"/a/./b/"` and `"/a/c/../b"` all name `/a/b`. See [`path`].
//!
//! ---
//!
//! ## Error Handling
//!
//! All operations return `Result<T, FsError>`. Errors include context:
//!
//! ```rust
//! use anyfs_store::FsError;
//! use std::path::PathBuf;
//!
//! let err = FsError::NotFound { path: PathBuf::from("/missing.txt") };
//! assert_eq!(err.to_string(), "not found: /missing.txt");
//! assert!(!err.is_retryable());
//! ```
//!
//! ---
//!
//! ## Watching
//!
//! Backends queue [`Event`]s as they change. A [`WatchRegistry`] owns one
//! dispatcher thread that periodically hands the queued events of every
//! registered backend to the matching [`Watcher`]s. See [`watch`].
//!
//! ---
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`. Methods take `&self` (not `&mut self`),
//! enabling safe concurrent access. Backends use interior mutability internally.
//!
//! ---
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]: structural changes at `debug`,
//! lifecycle at `info`, recoverable failures (such as an orphaned blob) at
//! `warn`. Install any subscriber to see them.

// Private modules
mod error;
mod ext;
mod handle;
mod index;
mod lifecycle;
mod pattern;
mod quota;
mod traits;
mod types;

// Public modules
pub mod config;
pub mod event;
pub mod memory;
pub mod meta;
pub mod path;
pub mod snapshot;
pub mod watch;

// Error type
pub use error::FsError;

// Core types
pub use types::{DirEntry, FileType, Handle, MODE_DIR, MODE_FILE, Metadata, OpenFlags, Permissions};

// Traits
pub use traits::{
    FileHandle, Fs, FsDir, FsFiles, FsLifecycle, FsSnapshot, FsStat, FsWatch, ReadDirIter,
    VirtualFs,
};

// Extension trait
pub use ext::FsExt;

// Backends
pub use memory::{MemContent, MemFile, MemoryFs};
pub use meta::{MetaFile, MetaFs};

// Configuration
pub use config::{MemoryConfig, MetaConfig, WatchConfig};

// Snapshots, events and watching
pub use event::{Event, EventOps, RetentionPolicy};
pub use pattern::{PathGlob, PathPattern};
pub use snapshot::{EntrySnapshotMetadata, Snapshot, SnapshotConfig, SnapshotContent};
pub use watch::{WatchRegistry, Watcher};
