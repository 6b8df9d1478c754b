//! Transactional key-value store holding the metadata records.
//!
//! [`LocalKv`] is the bundled implementation: an ordered map in memory,
//! optionally persisted to a JSON file on every commit. Writable
//! transactions are serialized; readers never block writers for longer than
//! a single lookup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::FsError;

/// A store of string keys and values with transactions.
pub trait KvStore: Send + Sync {
    /// Begin a transaction. A writable one waits for the previous writable
    /// transaction to finish.
    ///
    /// # Errors
    ///
    /// - [`FsError::Transaction`] if the store is closed
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTransaction + '_>, FsError>;

    /// Release the store. Later calls to [`KvStore::begin`] fail.
    fn close(&self) -> Result<(), FsError> {
        Ok(())
    }
}

/// An open transaction. Dropping it without [`KvTransaction::commit`] rolls
/// it back.
pub trait KvTransaction {
    /// Value of `key`, this transaction's own changes included.
    fn get(&self, key: &str) -> Result<Option<String>, FsError>;

    /// Set `key` to `value`.
    fn set(&mut self, key: &str, value: &str) -> Result<(), FsError>;

    /// Delete `key`. Returns `true` if it existed.
    fn delete(&mut self, key: &str) -> Result<bool, FsError>;

    /// Visit the keys starting with `prefix` in ascending order until
    /// `visit` returns `false`.
    fn ascend(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &str) -> bool,
    ) -> Result<(), FsError>;

    /// Apply the changes atomically.
    fn commit(self: Box<Self>) -> Result<(), FsError>;

    /// Discard the changes.
    fn rollback(self: Box<Self>);
}

/// Bundled [`KvStore`].
#[derive(Debug)]
pub struct LocalKv {
    data: RwLock<BTreeMap<String, String>>,
    writer: Mutex<()>,
    file: Option<PathBuf>,
    closed: AtomicBool,
}

impl LocalKv {
    /// Store living only in memory.
    pub fn in_memory() -> Self {
        Self::with_data(BTreeMap::new(), None)
    }

    /// Store persisted to `file`, loading its content if it exists.
    ///
    /// # Errors
    ///
    /// - [`FsError::Io`] if the file cannot be read
    /// - [`FsError::Deserialization`] if it is not a JSON object of strings
    pub fn open(file: impl AsRef<Path>) -> Result<Self, FsError> {
        let file = file.as_ref().to_path_buf();
        let data: BTreeMap<String, String> = match fs::read(&file) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(FsError::io("open kv", &file, err)),
        };
        debug!(file = %file.display(), keys = data.len(), "opened kv store");
        Ok(Self::with_data(data, Some(file)))
    }

    fn with_data(data: BTreeMap<String, String>, file: Option<PathBuf>) -> Self {
        Self {
            data: RwLock::new(data),
            writer: Mutex::new(()),
            file,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<(), FsError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let bytes =
            serde_json::to_vec(data).map_err(|err| FsError::Serialization(err.to_string()))?;
        let staging = file.with_extension("tmp");
        fs::write(&staging, bytes).map_err(|err| FsError::io("write kv", &staging, err))?;
        fs::rename(&staging, file).map_err(|err| FsError::io("replace kv", file, err))
    }
}

impl KvStore for LocalKv {
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTransaction + '_>, FsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FsError::Transaction("kv store is closed".into()));
        }
        let writer = if writable {
            Some(self.writer.lock())
        } else {
            None
        };
        Ok(Box::new(LocalTransaction {
            store: self,
            _writer: writer,
            writable,
            changes: BTreeMap::new(),
        }))
    }

    fn close(&self) -> Result<(), FsError> {
        let _writer = self.writer.lock();
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct LocalTransaction<'a> {
    store: &'a LocalKv,
    _writer: Option<MutexGuard<'a, ()>>,
    writable: bool,
    /// `None` marks a deletion.
    changes: BTreeMap<String, Option<String>>,
}

impl LocalTransaction<'_> {
    fn check_writable(&self) -> Result<(), FsError> {
        if self.writable {
            Ok(())
        } else {
            Err(FsError::Transaction("write in a read-only transaction".into()))
        }
    }
}

impl KvTransaction for LocalTransaction<'_> {
    fn get(&self, key: &str) -> Result<Option<String>, FsError> {
        if let Some(change) = self.changes.get(key) {
            return Ok(change.clone());
        }
        Ok(self.store.data.read().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), FsError> {
        self.check_writable()?;
        self.changes.insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, FsError> {
        self.check_writable()?;
        let existed = self.get(key)?.is_some();
        self.changes.insert(key.to_string(), None);
        Ok(existed)
    }

    fn ascend(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &str) -> bool,
    ) -> Result<(), FsError> {
        let mut view: BTreeMap<String, String> = self
            .store
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, change) in self.changes.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match change {
                Some(value) => view.insert(key.clone(), value.clone()),
                None => view.remove(key),
            };
        }
        for (key, value) in &view {
            if !visit(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), FsError> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.check_writable()?;
        let mut data = self.store.data.write();
        let mut next = data.clone();
        for (key, change) in &self.changes {
            match change {
                Some(value) => next.insert(key.clone(), value.clone()),
                None => next.remove(key),
            };
        }
        self.store.persist(&next)?;
        *data = next;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(kv: &LocalKv, prefix: &str) -> Vec<String> {
        let tx = kv.begin(false).unwrap();
        let mut out = Vec::new();
        tx.ascend(prefix, &mut |key, _| {
            out.push(key.to_string());
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn committed_changes_are_visible() {
        let kv = LocalKv::in_memory();
        let mut tx = kv.begin(true).unwrap();
        tx.set("a", "1").unwrap();
        assert_eq!(tx.get("a").unwrap().as_deref(), Some("1"));
        tx.commit().unwrap();
        assert_eq!(kv.begin(false).unwrap().get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn rollback_restores_every_key() {
        let kv = LocalKv::in_memory();
        let mut tx = kv.begin(true).unwrap();
        tx.set("keep", "old").unwrap();
        tx.set("gone", "x").unwrap();
        tx.commit().unwrap();

        let mut tx = kv.begin(true).unwrap();
        tx.set("keep", "new").unwrap();
        tx.delete("gone").unwrap();
        tx.set("added", "y").unwrap();
        tx.rollback();

        let tx = kv.begin(false).unwrap();
        assert_eq!(tx.get("keep").unwrap().as_deref(), Some("old"));
        assert_eq!(tx.get("gone").unwrap().as_deref(), Some("x"));
        assert_eq!(tx.get("added").unwrap(), None);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let kv = LocalKv::in_memory();
        {
            let mut tx = kv.begin(true).unwrap();
            tx.set("a", "1").unwrap();
        }
        assert!(kv.is_empty());
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let kv = LocalKv::in_memory();
        let mut tx = kv.begin(false).unwrap();
        assert!(matches!(tx.set("a", "1"), Err(FsError::Transaction(_))));
    }

    #[test]
    fn ascend_merges_pending_changes_in_order() {
        let kv = LocalKv::in_memory();
        let mut tx = kv.begin(true).unwrap();
        for key in ["/files/b", "/files/a", "/other"] {
            tx.set(key, "").unwrap();
        }
        tx.commit().unwrap();

        let mut tx = kv.begin(true).unwrap();
        tx.delete("/files/a").unwrap();
        tx.set("/files/c", "").unwrap();
        let mut seen = Vec::new();
        tx.ascend("/files/", &mut |key, _| {
            seen.push(key.to_string());
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["/files/b", "/files/c"]);
        drop(tx);

        assert_eq!(keys(&kv, "/files/"), vec!["/files/a", "/files/b"]);
    }

    #[test]
    fn persisted_store_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("metadata.kv");
        {
            let kv = LocalKv::open(&file).unwrap();
            let mut tx = kv.begin(true).unwrap();
            tx.set("k", "v").unwrap();
            tx.commit().unwrap();
        }
        let kv = LocalKv::open(&file).unwrap();
        assert_eq!(kv.begin(false).unwrap().get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn closed_store_refuses_transactions() {
        let kv = LocalKv::in_memory();
        kv.close().unwrap();
        assert!(matches!(kv.begin(false), Err(FsError::Transaction(_))));
    }
}
