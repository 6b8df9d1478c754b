//! # Filesystem Traits
//!
//! The trait hierarchy every storage backend implements.
//!
//! ## Trait Layers
//!
//! ```text
//! Core:     FsFiles + FsDir + FsStat = Fs
//!                                      ↓
//! Virtual:  Fs + FsLifecycle + FsSnapshot + FsWatch = VirtualFs
//! ```
//!
//! ## Quick Reference
//!
//! | Composite Trait | Component Traits | Use Case |
//! |-----------------|------------------|----------|
//! | [`Fs`] | [`FsFiles`], [`FsDir`], [`FsStat`] | Entries and content |
//! | [`VirtualFs`] | + [`FsLifecycle`], [`FsSnapshot`], [`FsWatch`] | Full backend contract |
//!
//! Open files are [`FileHandle`]s.
//!
//! ## Blanket Implementations
//!
//! Composite traits have blanket implementations. Implement the component
//! traits, and you get the composite trait automatically.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`. Methods take `&self` to enable concurrent
//! access. Backends use interior mutability for thread-safe state management.
//!
//! ## Object Safety
//!
//! All traits are object-safe and can be used as trait objects:
//!
//! ```rust
//! use anyfs_store::{Fs, MemoryConfig, MemoryFs};
//!
//! fn count_root_entries(fs: &dyn Fs) -> usize {
//!     fs.read_dir(std::path::Path::new("/")).map(|it| it.count()).unwrap_or(0)
//! }
//!
//! let fs = MemoryFs::new(MemoryConfig::default()).unwrap();
//! assert_eq!(count_root_entries(&fs), 0);
//! ```

mod file_handle;
mod fs_dir;
mod fs_files;
mod fs_lifecycle;
mod fs_snapshot;
mod fs_stat;
mod fs_watch;

pub(crate) use file_handle::seek_target;
pub use file_handle::FileHandle;
pub use fs_dir::{FsDir, ReadDirIter};
pub use fs_files::FsFiles;
pub use fs_lifecycle::FsLifecycle;
pub use fs_snapshot::FsSnapshot;
pub use fs_stat::FsStat;
pub use fs_watch::FsWatch;

/// Entries and content, the part of the contract every consumer needs.
///
/// # Blanket Implementation
///
/// Automatically implemented for any type that implements all three component
/// traits.
///
/// # Example
///
/// ```rust
/// use anyfs_store::{FileHandle, Fs, FsError};
/// use std::path::Path;
///
/// fn copy_file<B: Fs + ?Sized>(fs: &B, src: &Path, dst: &Path) -> Result<(), FsError> {
///     let mut input = fs.open(src)?;
///     let mut output = fs.create(dst)?;
///     let mut buf = [0u8; 4096];
///     loop {
///         let n = input.read(&mut buf)?;
///         if n == 0 {
///             break;
///         }
///         output.write(&buf[..n])?;
///     }
///     output.close()?;
///     input.close()
/// }
/// ```
pub trait Fs: FsFiles + FsDir + FsStat {}

impl<T: FsFiles + FsDir + FsStat + ?Sized> Fs for T {}

/// The full contract of a storage backend.
///
/// # Blanket Implementation
///
/// Automatically implemented for any type implementing
/// `Fs + FsLifecycle + FsSnapshot + FsWatch`.
pub trait VirtualFs: Fs + FsLifecycle + FsSnapshot + FsWatch {}

impl<T: Fs + FsLifecycle + FsSnapshot + FsWatch + ?Sized> VirtualFs for T {}
