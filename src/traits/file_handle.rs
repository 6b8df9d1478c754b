//! Open file handles.
//!
//! # Overview
//!
//! Handles are returned by [`FsFiles::open_file`](crate::FsFiles::open_file)
//! and friends. Several handles on the same file share its content: a write
//! through one is visible through the others immediately. Each handle keeps
//! its own cursor for [`read`](FileHandle::read) and
//! [`write`](FileHandle::write); the `_at` variants ignore it.
//!
//! | Misuse | Error |
//! |--------|-------|
//! | read on a handle without `read` | [`FsError::ReadNotSupported`] |
//! | write/truncate without `write` or `append` | [`FsError::WriteNotSupported`] |
//! | anything after `close` | [`FsError::FileClosed`] |
//! | seek before offset 0 | [`FsError::InvalidSeek`] |
//!
//! `dyn FileHandle` also implements [`std::io::Read`], [`std::io::Write`]
//! and [`std::io::Seek`], so a boxed handle works with `std::io::copy` and
//! friends.
//!
//! # Example
//!
//! ```rust
//! use anyfs_store::{FileHandle, FsFiles, MemoryConfig, MemoryFs};
//! use std::io::SeekFrom;
//! use std::path::Path;
//!
//! let fs = MemoryFs::new(MemoryConfig::default()).unwrap();
//! let mut file = fs.create(Path::new("/notes.txt")).unwrap();
//! file.write(b"hello").unwrap();
//! file.seek(SeekFrom::Start(0)).unwrap();
//!
//! let mut buf = [0u8; 5];
//! assert_eq!(file.read(&mut buf).unwrap(), 5);
//! assert_eq!(&buf, b"hello");
//! file.close().unwrap();
//! ```

use std::io::SeekFrom;

use crate::{FsError, Handle, Metadata, OpenFlags};

/// An open file.
pub trait FileHandle: Send + Sync + std::fmt::Debug {
    /// Slot of the handle in its backend's handle arena.
    fn handle(&self) -> Handle;

    /// Current normalized path of the file; follows renames.
    fn path(&self) -> String;

    /// Flags the handle was opened with.
    fn flags(&self) -> OpenFlags;

    /// Read at the cursor and advance it. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Read at `offset` without moving the cursor. Returns 0 at end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError>;

    /// Write at the cursor and advance it.
    ///
    /// # Errors
    ///
    /// - [`FsError::QuotaExceeded`] if the growth does not fit; nothing is
    ///   written in that case
    fn write(&mut self, data: &[u8]) -> Result<usize, FsError>;

    /// Write at `offset` without moving the cursor.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError>;

    /// Move the cursor.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError>;

    /// Resize the file, zero-filling any growth.
    fn truncate(&self, size: u64) -> Result<(), FsError>;

    /// Flush buffered content to the storage medium.
    fn sync(&self) -> Result<(), FsError>;

    /// Metadata of the file.
    fn stat(&self) -> Result<Metadata, FsError>;

    /// Close the handle and free its slot.
    ///
    /// # Errors
    ///
    /// - [`FsError::FileClosed`] if the handle is already closed
    fn close(&mut self) -> Result<(), FsError>;

    /// Returns `true` once closed.
    fn is_closed(&self) -> bool;

    /// Locking is a no-op.
    fn lock(&self) -> Result<(), FsError> {
        Ok(())
    }

    /// Locking is a no-op.
    fn unlock(&self) -> Result<(), FsError> {
        Ok(())
    }
}

/// Resolve a seek request against the cursor and the file length.
pub(crate) fn seek_target(
    path: &str,
    cursor: u64,
    len: u64,
    pos: SeekFrom,
) -> Result<u64, FsError> {
    let target = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::Current(delta) => cursor as i64 + delta,
        SeekFrom::End(delta) => len as i64 + delta,
    };
    if target < 0 {
        return Err(FsError::InvalidSeek {
            path: path.into(),
            offset: target,
        });
    }
    Ok(target as u64)
}

impl std::io::Read for dyn FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        FileHandle::read(self, buf).map_err(Into::into)
    }
}

impl std::io::Write for dyn FileHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        FileHandle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        FileHandle::sync(self).map_err(Into::into)
    }
}

impl std::io::Seek for dyn FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        FileHandle::seek(self, pos).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_target_resolves_whence() {
        assert_eq!(seek_target("/f", 3, 10, SeekFrom::Start(7)).unwrap(), 7);
        assert_eq!(seek_target("/f", 3, 10, SeekFrom::Current(2)).unwrap(), 5);
        assert_eq!(seek_target("/f", 3, 10, SeekFrom::End(-4)).unwrap(), 6);
        assert_eq!(seek_target("/f", 3, 10, SeekFrom::End(5)).unwrap(), 15);
    }

    #[test]
    fn seek_before_start_is_rejected() {
        assert!(matches!(
            seek_target("/f", 3, 10, SeekFrom::Current(-4)),
            Err(FsError::InvalidSeek { offset: -1, .. })
        ));
    }
}
