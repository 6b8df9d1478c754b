//! Handles on files of the metadata-indexed backend.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::warn;

use crate::event::{Event, EventOps};
use crate::handle::HandleShared;
use crate::meta::blob::Blob;
use crate::traits::seek_target;
use crate::{FileHandle, FileType, FsError, Handle, Metadata, OpenFlags, Permissions, path};

use super::MetaInner;

/// An open file of a [`MetaFs`](super::MetaFs).
///
/// Reads and writes go straight to the blob; growth is checked against the
/// usable space first. Closing writes the last modification time back to
/// the file's record.
pub struct MetaFile {
    fs: Arc<MetaInner>,
    handle: Handle,
    shared: Arc<HandleShared>,
    blob: Arc<dyn Blob>,
    permissions: Permissions,
    created: SystemTime,
    /// Modification time of the record when the handle was opened.
    recorded: SystemTime,
    cursor: u64,
}

impl std::fmt::Debug for MetaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaFile")
            .field("path", &self.shared.path())
            .field("flags", &self.shared.flags())
            .field("cursor", &self.cursor)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl MetaFile {
    pub(crate) fn open(
        fs: Arc<MetaInner>,
        path: &str,
        flags: OpenFlags,
        permissions: Permissions,
        created: SystemTime,
        recorded: SystemTime,
        blob: Arc<dyn Blob>,
    ) -> Result<Self, FsError> {
        if flags.truncate && flags.writes() {
            let len = blob.len()?;
            if len > 0 {
                blob.set_len(0)?;
                fs.space.release(len);
                fs.touch(path);
                fs.events.push(Event::file(path, EventOps::WRITE));
            }
        }
        let cursor = if flags.append { blob.len()? } else { 0 };
        let (handle, shared) = fs.handles.insert(path, flags, Arc::clone(&blob));
        Ok(Self {
            fs,
            handle,
            shared,
            blob,
            permissions,
            created,
            recorded,
            cursor,
        })
    }

    fn closed_error(&self) -> FsError {
        FsError::FileClosed {
            path: self.shared.path().into(),
        }
    }

    fn check_readable(&self) -> Result<(), FsError> {
        if self.shared.is_closed() {
            return Err(self.closed_error());
        }
        if !self.shared.flags().read {
            return Err(FsError::ReadNotSupported {
                path: self.shared.path().into(),
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), FsError> {
        if self.shared.is_closed() {
            return Err(self.closed_error());
        }
        if !self.shared.flags().writes() {
            return Err(FsError::WriteNotSupported {
                path: self.shared.path().into(),
            });
        }
        Ok(())
    }

    fn resize_to(&self, size: u64) -> Result<(), FsError> {
        let len = self.blob.len()?;
        if size > len {
            self.fs.space.admit(&*self.fs.blobs, size - len)?;
        }
        self.blob.set_len(size)?;
        if size < len {
            self.fs.space.release(len - size);
        }
        Ok(())
    }

    fn written(&self) {
        let path = self.shared.path();
        self.fs.touch(&path);
        self.fs.events.push(Event::file(&path, EventOps::WRITE));
    }

    fn finish(&self) {
        self.fs.handles.remove(self.handle);
        if self.fs.lifecycle.is_closing() {
            return;
        }
        let path = self.shared.path();
        if let Err(err) = self.fs.persist_mtime(&path) {
            warn!(%path, error = %err, "failed to record modification time");
        }
    }
}

impl FileHandle for MetaFile {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn path(&self) -> String {
        self.shared.path()
    }

    fn flags(&self) -> OpenFlags {
        self.shared.flags()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let n = self.read_at(buf, self.cursor)?;
        self.cursor += n as u64;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        self.check_readable()?;
        self.blob.read_at(buf, offset)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        let n = self.write_at(data, self.cursor)?;
        self.cursor += n as u64;
        Ok(n)
    }

    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        self.check_writable()?;
        let len = self.blob.len()?;
        let end = offset.saturating_add(data.len() as u64);
        if end > len {
            self.fs.space.admit(&*self.fs.blobs, end - len)?;
        }
        let n = self.blob.write_at(data, offset)?;
        self.written();
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        if self.shared.is_closed() {
            return Err(self.closed_error());
        }
        self.cursor = seek_target(&self.shared.path(), self.cursor, self.blob.len()?, pos)?;
        Ok(self.cursor)
    }

    fn truncate(&self, size: u64) -> Result<(), FsError> {
        self.check_writable()?;
        self.resize_to(size)?;
        self.written();
        Ok(())
    }

    fn sync(&self) -> Result<(), FsError> {
        if self.shared.is_closed() {
            return Err(self.closed_error());
        }
        self.blob.sync()?;
        self.fs.persist_mtime(&self.shared.path())
    }

    fn stat(&self) -> Result<Metadata, FsError> {
        if self.shared.is_closed() {
            return Err(self.closed_error());
        }
        let path = self.shared.path();
        Ok(Metadata {
            name: path::basename(&path).to_string(),
            path: path.clone().into(),
            file_type: FileType::File,
            size: self.blob.len()?,
            permissions: self.permissions,
            created: self.created,
            modified: self
                .fs
                .modified_time(&path)
                .map_or(self.recorded, |at| at.max(self.recorded)),
        })
    }

    fn close(&mut self) -> Result<(), FsError> {
        if !self.shared.mark_closed() {
            return Err(self.closed_error());
        }
        self.finish();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for MetaFile {
    fn drop(&mut self) {
        if self.shared.mark_closed() {
            self.finish();
        }
    }
}

impl std::io::Read for MetaFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        FileHandle::read(self, buf).map_err(Into::into)
    }
}

impl std::io::Write for MetaFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        FileHandle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        FileHandle::sync(self).map_err(Into::into)
    }
}

impl std::io::Seek for MetaFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        FileHandle::seek(self, pos).map_err(Into::into)
    }
}
