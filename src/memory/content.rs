//! Shared byte buffer of an in-memory file.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::quota::Quota;
use crate::FsError;

#[derive(Debug)]
struct ContentState {
    bytes: Vec<u8>,
    modified: SystemTime,
    /// Bytes of this content currently charged to the quota.
    charged: u64,
    dirty: bool,
    being_persisted: bool,
    modified_during_persistence: bool,
    capturing: bool,
}

/// Content of one in-memory file, shared by its record and every open handle.
///
/// Growth is reserved on the filesystem quota before the buffer changes; a
/// failed reservation leaves both untouched. The bytes charged by a content
/// are released when it is removed from the tree or dropped.
#[derive(Debug)]
pub struct MemContent {
    state: RwLock<ContentState>,
    created: SystemTime,
    quota: Arc<Quota>,
}

impl MemContent {
    pub(crate) fn new(quota: Arc<Quota>, created: SystemTime) -> Self {
        Self {
            state: RwLock::new(ContentState {
                bytes: Vec::new(),
                modified: created,
                charged: 0,
                dirty: false,
                being_persisted: false,
                modified_during_persistence: false,
                capturing: false,
            }),
            created,
            quota,
        }
    }

    /// Content restored from a capture, with its original times.
    pub(crate) fn restored(
        quota: Arc<Quota>,
        bytes: Vec<u8>,
        created: SystemTime,
        modified: SystemTime,
    ) -> Result<Self, FsError> {
        let charged = bytes.len() as u64;
        quota.reserve(charged)?;
        let content = Self::new(quota, created);
        {
            let mut state = content.state.write();
            state.bytes = bytes;
            state.modified = modified;
            state.charged = charged;
        }
        Ok(content)
    }

    /// Current length in bytes.
    pub fn len(&self) -> u64 {
        self.state.read().bytes.len() as u64
    }

    /// Returns `true` if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creation time.
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Time of the last write or truncation.
    pub fn modified(&self) -> SystemTime {
        self.state.read().modified
    }

    /// Copy of the bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.state.read().bytes.clone()
    }

    /// Copy bytes at `offset` into `buf`. Returns 0 at or past the end.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        let state = self.state.read();
        let len = state.bytes.len() as u64;
        if offset >= len {
            return 0;
        }
        let start = offset as usize;
        let n = buf.len().min(state.bytes.len() - start);
        buf[..n].copy_from_slice(&state.bytes[start..start + n]);
        n
    }

    /// Write `data` at `offset`, zero-filling any gap.
    ///
    /// # Errors
    ///
    /// - [`FsError::QuotaExceeded`] if the growth does not fit; nothing is
    ///   written
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let mut state = self.state.write();
        let end = offset.saturating_add(data.len() as u64);
        let len = state.bytes.len() as u64;
        if end > len {
            let growth = end - len;
            self.quota.reserve(growth)?;
            state.charged += growth;
            state.bytes.resize(end as usize, 0);
        }
        let start = offset as usize;
        state.bytes[start..start + data.len()].copy_from_slice(data);
        touch(&mut state);
        Ok(data.len())
    }

    /// Resize to `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`FsError::QuotaExceeded`] if the growth does not fit
    pub fn truncate(&self, size: u64) -> Result<(), FsError> {
        let mut state = self.state.write();
        let len = state.bytes.len() as u64;
        if size > len {
            let growth = size - len;
            self.quota.reserve(growth)?;
            state.charged += growth;
        } else {
            let released = (len - size).min(state.charged);
            self.quota.release(released);
            state.charged -= released;
        }
        state.bytes.resize(size as usize, 0);
        touch(&mut state);
        Ok(())
    }

    /// Returns `true` if written since the last successful persistence.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Returns `true` if dirty and no persistence is running.
    pub fn should_be_persisted(&self) -> bool {
        let state = self.state.read();
        state.dirty && !state.being_persisted
    }

    /// Hand a copy of dirty content to `persist`.
    ///
    /// The content becomes clean only if `persist` succeeds and no write
    /// happened meanwhile. Clean content, and content being captured by a
    /// snapshot, is skipped.
    pub fn persist<F>(&self, persist: F) -> Result<(), FsError>
    where
        F: FnOnce(&[u8]) -> Result<(), FsError>,
    {
        let bytes = {
            let mut state = self.state.write();
            if !state.dirty || state.capturing || state.being_persisted {
                return Ok(());
            }
            state.being_persisted = true;
            state.bytes.clone()
        };

        let mut guard = PersistGuard {
            content: self,
            succeeded: false,
        };
        let result = persist(&bytes);
        guard.succeeded = result.is_ok();
        result
    }

    pub(crate) fn set_capturing(&self, capturing: bool) {
        self.state.write().capturing = capturing;
    }

    /// Stop charging the quota for the current bytes.
    pub(crate) fn detach(&self) {
        let mut state = self.state.write();
        self.quota.release(state.charged);
        state.charged = 0;
    }
}

impl Drop for MemContent {
    fn drop(&mut self) {
        self.quota.release(self.state.get_mut().charged);
    }
}

fn touch(state: &mut ContentState) {
    state.modified = SystemTime::now();
    state.dirty = true;
    if state.being_persisted {
        state.modified_during_persistence = true;
    }
}

struct PersistGuard<'a> {
    content: &'a MemContent,
    succeeded: bool,
}

impl Drop for PersistGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.content.state.write();
        if self.succeeded && !state.modified_during_persistence {
            state.dirty = false;
        }
        state.being_persisted = false;
        state.modified_during_persistence = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(limit: u64) -> (Arc<Quota>, MemContent) {
        let quota = Arc::new(Quota::new(limit));
        let content = MemContent::new(Arc::clone(&quota), SystemTime::now());
        (quota, content)
    }

    #[test]
    fn write_past_end_zero_fills_and_charges() {
        let (quota, c) = content(100);
        c.write_at(b"ab", 3).unwrap();
        assert_eq!(c.bytes(), b"\0\0\0ab");
        assert_eq!(quota.used(), 5);

        c.write_at(b"XY", 0).unwrap();
        assert_eq!(c.bytes(), b"XY\0ab");
        assert_eq!(quota.used(), 5);
    }

    #[test]
    fn over_quota_write_changes_nothing() {
        let (quota, c) = content(10);
        c.write_at(b"12345678", 0).unwrap();
        let err = c.write_at(b"abcdef", 6).unwrap_err();
        assert!(matches!(err, FsError::QuotaExceeded { limit: 10, .. }));
        assert_eq!(c.bytes(), b"12345678");
        assert_eq!(quota.used(), 8);
    }

    #[test]
    fn read_at_end_returns_zero() {
        let (_, c) = content(100);
        c.write_at(b"hello", 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(c.read_at(&mut buf, 3), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(c.read_at(&mut buf, 5), 0);
    }

    #[test]
    fn truncate_releases_and_reserves() {
        let (quota, c) = content(100);
        c.write_at(&[1; 40], 0).unwrap();
        c.truncate(10).unwrap();
        assert_eq!(quota.used(), 10);
        c.truncate(30).unwrap();
        assert_eq!(c.bytes()[10..], [0; 20]);
        assert_eq!(quota.used(), 30);
        assert!(c.truncate(200).is_err());
        assert_eq!(c.len(), 30);
    }

    #[test]
    fn drop_and_detach_release_charge() {
        let (quota, c) = content(100);
        c.write_at(&[1; 40], 0).unwrap();
        c.detach();
        assert_eq!(quota.used(), 0);
        c.write_at(&[1; 5], 40).unwrap();
        assert_eq!(quota.used(), 5);
        drop(c);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn persist_clears_dirty_unless_modified_meanwhile() {
        let (_, c) = content(100);
        c.write_at(b"v1", 0).unwrap();
        assert!(c.should_be_persisted());

        let mut seen = Vec::new();
        c.persist(|bytes| {
            seen.extend_from_slice(bytes);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, b"v1");
        assert!(!c.is_dirty());

        c.write_at(b"v2", 0).unwrap();
        c.persist(|_| {
            c.write_at(b"v3", 0).map(|_| ())
        })
        .unwrap();
        assert!(c.is_dirty());
    }

    #[test]
    fn failed_persist_keeps_dirty() {
        let (_, c) = content(100);
        c.write_at(b"x", 0).unwrap();
        let result = c.persist(|_| Err(FsError::NotSupported { operation: "test" }));
        assert!(result.is_err());
        assert!(c.should_be_persisted());
    }

    #[test]
    fn persist_skips_while_capturing() {
        let (_, c) = content(100);
        c.write_at(b"x", 0).unwrap();
        c.set_capturing(true);
        let mut called = false;
        c.persist(|_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(!called);
        assert!(c.is_dirty());
    }
}
