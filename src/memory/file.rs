//! Handles on in-memory files.

use std::io::SeekFrom;
use std::sync::Arc;

use crate::event::{Event, EventOps};
use crate::handle::HandleShared;
use crate::traits::seek_target;
use crate::{FileHandle, FileType, FsError, Handle, Metadata, OpenFlags, Permissions, path};

use super::{MemContent, MemoryInner};

/// An open in-memory file.
///
/// Handles on the same file share one [`MemContent`]. Dropping an open
/// handle closes it.
pub struct MemFile {
    fs: Arc<MemoryInner>,
    handle: Handle,
    shared: Arc<HandleShared>,
    content: Arc<MemContent>,
    permissions: Permissions,
    cursor: u64,
}

impl std::fmt::Debug for MemFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFile")
            .field("path", &self.shared.path())
            .field("flags", &self.shared.flags())
            .field("cursor", &self.cursor)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl MemFile {
    /// Open a new handle on `content`.
    ///
    /// Truncate-on-open empties the shared content; append-on-open puts the
    /// cursor at its end.
    pub(crate) fn open(
        fs: Arc<MemoryInner>,
        path: &str,
        flags: OpenFlags,
        permissions: Permissions,
        content: Arc<MemContent>,
    ) -> Result<Self, FsError> {
        if flags.truncate && flags.writes() && !content.is_empty() {
            content.truncate(0)?;
            fs.events.push(Event::file(path, EventOps::WRITE));
        }
        let cursor = if flags.append { content.len() } else { 0 };
        let (handle, shared) = fs.handles.insert(path, flags, Arc::clone(&content));
        Ok(Self {
            fs,
            handle,
            shared,
            content,
            permissions,
            cursor,
        })
    }

    /// The shared content.
    pub fn content(&self) -> &Arc<MemContent> {
        &self.content
    }

    fn check_open(&self) -> Result<(), FsError> {
        if self.shared.is_closed() {
            return Err(FsError::FileClosed {
                path: self.shared.path().into(),
            });
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<(), FsError> {
        self.check_open()?;
        if !self.shared.flags().read {
            return Err(FsError::ReadNotSupported {
                path: self.shared.path().into(),
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), FsError> {
        self.check_open()?;
        if !self.shared.flags().writes() {
            return Err(FsError::WriteNotSupported {
                path: self.shared.path().into(),
            });
        }
        Ok(())
    }

    fn written(&self) {
        self.fs
            .events
            .push(Event::file(&self.shared.path(), EventOps::WRITE));
    }
}

impl FileHandle for MemFile {
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
        Ok(self.content.read_at(buf, offset))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        let n = self.write_at(data, self.cursor)?;
        self.cursor += n as u64;
        Ok(n)
    }

    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        self.check_writable()?;
        let n = self.content.write_at(data, offset)?;
        self.written();
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        self.check_open()?;
        self.cursor = seek_target(&self.shared.path(), self.cursor, self.content.len(), pos)?;
        Ok(self.cursor)
    }

    fn truncate(&self, size: u64) -> Result<(), FsError> {
        self.check_writable()?;
        self.content.truncate(size)?;
        self.written();
        Ok(())
    }

    fn sync(&self) -> Result<(), FsError> {
        self.check_open()
    }

    fn stat(&self) -> Result<Metadata, FsError> {
        self.check_open()?;
        let path = self.shared.path();
        Ok(Metadata {
            name: path::basename(&path).to_string(),
            path: path.clone().into(),
            file_type: FileType::File,
            size: self.content.len(),
            permissions: self.permissions,
            created: self.content.created(),
            modified: self.content.modified(),
        })
    }

    fn close(&mut self) -> Result<(), FsError> {
        if !self.shared.mark_closed() {
            return Err(FsError::FileClosed {
                path: self.shared.path().into(),
            });
        }
        self.fs.handles.remove(self.handle);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        if self.shared.mark_closed() {
            self.fs.handles.remove(self.handle);
        }
    }
}

impl std::io::Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        FileHandle::read(self, buf).map_err(Into::into)
    }
}

impl std::io::Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        FileHandle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        FileHandle::sync(self).map_err(Into::into)
    }
}

impl std::io::Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        FileHandle::seek(self, pos).map_err(Into::into)
    }
}
