//! # Metadata-Indexed Backend
//!
//! ## Overview
//!
//! [`MetaFs`] splits a filesystem in two collaborators:
//!
//! | Collaborator | Holds | Bundled |
//! |--------------|-------|---------|
//! | [`KvStore`] | one JSON record per entry, keyed `"/files" + path` | [`LocalKv`] |
//! | [`BlobStore`] | the bytes of each file, in a blob named by the record | [`DirBlobStore`], [`MemoryBlobStore`] |
//!
//! Every structural change runs in a single KV transaction, so a failure
//! leaves the records as they were. Blobs are created after the record is
//! committed and deleted after it is removed; a failed deletion only leaves
//! an orphan blob behind.
//!
//! ## Admission
//!
//! Creating a file passes, in order: a parallel-creation permit (rejected
//! with the retryable [`FsError::TooManyParallelCreations`]), one unit of the
//! file-count quota, then the structural lock and the transaction. Every
//! step is undone on failure.
//!
//! ## Example
//!
//! ```rust
//! use anyfs_store::meta::{LocalKv, MemoryBlobStore};
//! use anyfs_store::{FsExt, MetaConfig, MetaFs};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let fs = MetaFs::open(
//!     Arc::new(LocalKv::in_memory()),
//!     Arc::new(MemoryBlobStore::new()),
//!     MetaConfig::default(),
//! )
//! .unwrap();
//! fs.write_file(Path::new("/etc/app.toml"), b"debug = true").unwrap();
//! assert_eq!(fs.read_file(Path::new("/etc/app.toml")).unwrap(), b"debug = true");
//! assert_eq!(fs.file_count(), 1);
//! ```

pub mod blob;
mod file;
pub mod kv;
mod record;
mod space;

pub use blob::{Blob, BlobInfo, BlobStore, DirBlobStore, MemoryBlobStore};
pub use file::MetaFile;
pub use kv::{KvStore, KvTransaction, LocalKv};
pub use record::BlobName;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{META_MAX_SNAPSHOTABLE_SIZE, MetaConfig};
use crate::event::{Event, EventOps, EventQueue};
use crate::handle::HandleTable;
use crate::index::{EntryKind, EntryRecord, Hierarchy, RecordStore};
use crate::lifecycle::Lifecycle;
use crate::quota::{CreationLimiter, Quota, SnapshotFlag};
use crate::snapshot::{self, CaptureSource, Snapshot, SnapshotConfig};
use crate::watch::{Watchable, Watcher, WatcherList, WatchRegistry};
use crate::{
    DirEntry, FileHandle, FsDir, FsError, FsFiles, FsLifecycle, FsSnapshot, FsStat, FsWatch,
    Metadata, OpenFlags, PathPattern, Permissions, ReadDirIter, path,
};
use record::TxStore;
use space::UsedSpace;

pub(crate) struct MetaInner {
    kv: Arc<dyn KvStore>,
    blobs: Arc<dyn BlobStore>,
    config: MetaConfig,
    structure: RwLock<()>,
    space: UsedSpace,
    files: Quota,
    creations: CreationLimiter,
    mtimes: RwLock<HashMap<String, SystemTime>>,
    events: EventQueue,
    handles: HandleTable<Arc<dyn Blob>>,
    watchers: WatcherList,
    registry: Option<WatchRegistry>,
    registry_id: u64,
    lifecycle: Lifecycle,
    snapshot_flag: SnapshotFlag,
}

impl MetaInner {
    fn read_tx<R>(&self, read: impl FnOnce(&TxStore<'_>) -> Result<R, FsError>) -> Result<R, FsError> {
        let store = TxStore::new(self.kv.begin(false)?);
        let result = read(&store);
        store.rollback();
        result
    }

    fn write_tx<R>(
        &self,
        write: impl FnOnce(&mut TxStore<'_>) -> Result<R, FsError>,
    ) -> Result<R, FsError> {
        let mut store = TxStore::new(self.kv.begin(true)?);
        match write(&mut store) {
            Ok(result) => {
                store.commit()?;
                Ok(result)
            }
            Err(err) => {
                store.rollback();
                Err(err)
            }
        }
    }

    fn blob_info(&self, path: &str, blob: &BlobName) -> Result<BlobInfo, FsError> {
        self.blobs.stat(blob.as_str()).map_err(|err| match err {
            FsError::NotFound { .. } => FsError::CorruptedData {
                path: path.into(),
                details: format!("blob {blob} is missing"),
            },
            other => other,
        })
    }

    fn open_blob(&self, path: &str, blob: &BlobName) -> Result<Arc<dyn Blob>, FsError> {
        self.blobs.open(blob.as_str()).map_err(|err| match err {
            FsError::NotFound { .. } => FsError::CorruptedData {
                path: path.into(),
                details: format!("blob {blob} is missing"),
            },
            other => other,
        })
    }

    fn describe(&self, path: &str, record: &EntryRecord<BlobName>) -> Result<Metadata, FsError> {
        let (size, modified) = match &record.kind {
            EntryKind::File { content } => {
                let overlay = self.mtimes.read().get(path).copied();
                let modified = overlay.map_or(record.modified, |at| at.max(record.modified));
                (self.blob_info(path, content)?.size, modified)
            }
            EntryKind::Directory { .. } => (0, record.modified),
        };
        Ok(Metadata {
            name: path::basename(path).to_string(),
            path: path.into(),
            file_type: record.file_type(),
            size,
            permissions: record.permissions,
            created: record.created,
            modified,
        })
    }

    /// Note a content change of `path`.
    fn touch(&self, path: &str) {
        self.mtimes.write().insert(path.to_string(), SystemTime::now());
    }

    fn modified_time(&self, path: &str) -> Option<SystemTime> {
        self.mtimes.read().get(path).copied()
    }

    /// Write the noted modification time of `path` into its record.
    fn persist_mtime(&self, path: &str) -> Result<(), FsError> {
        let Some(modified) = self.modified_time(path) else {
            return Ok(());
        };
        let _structure = self.structure.read();
        self.write_tx(|store| {
            match store.get(path)? {
                Some(mut record) if !record.is_dir() && record.modified < modified => {
                    record.modified = modified;
                    store.put(path, record)
                }
                _ => Ok(()),
            }
        })
    }

    fn existing(
        &self,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Option<(BlobName, Permissions, SystemTime, SystemTime)>, FsError> {
        let Some(record) = self.read_tx(|store| store.get(path))? else {
            return Ok(None);
        };
        if flags.create && flags.exclusive {
            return Err(FsError::exists(path, "open"));
        }
        match record.kind {
            EntryKind::Directory { .. } => Err(FsError::CannotOpenDirectory { path: path.into() }),
            EntryKind::File { content } => Ok(Some((
                content,
                record.permissions,
                record.created,
                record.modified,
            ))),
        }
    }

    fn create_file(
        &self,
        path: &str,
        permissions: Permissions,
    ) -> Result<(Arc<dyn Blob>, SystemTime), FsError> {
        let _permit = self.creations.acquire()?;
        let reservation = self
            .files
            .reserve_scoped(1)
            .map_err(|_| FsError::FileCountExceeded {
                limit: self.config.max_file_count,
            })?;

        let _structure = self.structure.write();
        let now = SystemTime::now();
        let blob_name = BlobName::generate();
        let created = self.write_tx(|store| {
            if store.get(path)?.is_some() {
                return Err(FsError::exists(path, "create (file was created in the meantime)"));
            }
            let record = EntryRecord::file(permissions, blob_name.clone(), now);
            store.create_entry(path, record, now)
        })?;

        let blob = match self.blobs.create(blob_name.as_str()) {
            Ok(blob) => blob,
            Err(err) => {
                let undo = self.write_tx(|store| Hierarchy::remove_entry(store, path, now));
                if let Err(undo_err) = undo {
                    warn!(path, error = %undo_err, "failed to remove record of unborn file");
                }
                return Err(err);
            }
        };
        reservation.commit();
        if !created.dirs.is_empty() {
            debug!(path, parents = ?created.dirs, "materialized parent directories");
        }
        self.events.push(Event::file(path, EventOps::CREATE));
        Ok((blob, now))
    }
}

impl Watchable for MetaInner {
    fn events(&self) -> &EventQueue {
        &self.events
    }

    fn live_watchers(&self) -> Vec<Watcher> {
        self.watchers.live()
    }

    fn is_closing(&self) -> bool {
        self.lifecycle.is_closing()
    }
}

/// Filesystem whose metadata lives in a [`KvStore`] and whose contents live
/// in a [`BlobStore`].
///
/// # Thread Safety
///
/// Structural operations serialize on one lock; handle I/O goes straight to
/// the blobs.
#[derive(Clone)]
pub struct MetaFs {
    inner: Arc<MetaInner>,
}

impl std::fmt::Debug for MetaFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaFs")
            .field("blobs", &self.inner.blobs)
            .field("config", &self.inner.config)
            .field("file_count", &self.file_count())
            .field("open_handles", &self.inner.handles.len())
            .field("closed", &self.inner.lifecycle.is_closed())
            .finish()
    }
}

impl MetaFs {
    /// Open a filesystem over existing or empty collaborators.
    ///
    /// Creates the root record if missing, measures the used space, counts the
    /// files and adopts blob modification times newer than their records.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidConfig`] for an invalid config
    /// - [`FsError::QuotaExceeded`] if the blobs already exceed the usable
    ///   space
    /// - [`FsError::CorruptedData`] if a record is invalid or has no blob
    pub fn open(
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        config: MetaConfig,
    ) -> Result<Self, FsError> {
        Self::build(kv, blobs, config, None)
    }

    /// Like [`MetaFs::open`], with watchers served by `registry`.
    pub fn open_with_registry(
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        config: MetaConfig,
        registry: WatchRegistry,
    ) -> Result<Self, FsError> {
        Self::build(kv, blobs, config, Some(registry))
    }

    /// Restore the tree of `snapshot` into empty collaborators.
    pub fn from_snapshot(
        snapshot: &Snapshot,
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        config: MetaConfig,
    ) -> Result<Self, FsError> {
        let file_count = snapshot.entries().filter(|entry| !entry.is_dir()).count();
        if file_count as u64 > config.max_file_count {
            return Err(FsError::FileCountExceeded {
                limit: config.max_file_count,
            });
        }
        let fs = Self::build(kv, blobs, config, None)?;
        let inner = &fs.inner;
        inner.space.admit(&*inner.blobs, snapshot.size())?;

        let mut records = Vec::with_capacity(snapshot.len());
        snapshot.for_each_entry(|entry| {
            let key = entry.normalized_path();
            let kind = if entry.is_dir() {
                EntryKind::Directory {
                    children: entry.child_names.iter().cloned().collect(),
                }
            } else {
                let name = BlobName::generate();
                let blob = inner.blobs.create(name.as_str())?;
                let content = snapshot.content(&key)?;
                blob.write_at(content.bytes(), 0)?;
                blob.sync()?;
                EntryKind::File { content: name }
            };
            records.push((
                key,
                EntryRecord {
                    permissions: entry.permissions,
                    created: entry.created,
                    modified: entry.modified,
                    kind,
                },
            ));
            Ok(())
        })?;

        inner.write_tx(|store| {
            for (key, record) in records {
                store.put(&key, record)?;
            }
            Ok(())
        })?;
        inner.files.set_used(file_count as u64);
        inner.space.refresh(&*inner.blobs)?;
        info!(entries = snapshot.len(), bytes = snapshot.size(), "restored meta filesystem");
        Ok(fs)
    }

    fn build(
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        config: MetaConfig,
        registry: Option<WatchRegistry>,
    ) -> Result<Self, FsError> {
        config.validate()?;
        let policy = registry
            .as_ref()
            .map(WatchRegistry::retention_policy)
            .unwrap_or_default();
        let registry_id = registry.as_ref().map_or(0, WatchRegistry::allocate_id);

        let inner = MetaInner {
            kv,
            blobs,
            config,
            structure: RwLock::new(()),
            space: UsedSpace::new(config.max_usable_space),
            files: Quota::new(config.max_file_count),
            creations: CreationLimiter::new(config.max_parallel_creations),
            mtimes: RwLock::new(HashMap::new()),
            events: EventQueue::new(policy),
            handles: HandleTable::default(),
            watchers: WatcherList::default(),
            registry,
            registry_id,
            lifecycle: Lifecycle::default(),
            snapshot_flag: SnapshotFlag::default(),
        };

        let now = SystemTime::now();
        if inner.write_tx(|store| store.ensure_root(now))? {
            debug!("created root record");
        }

        let used = inner.space.refresh(&*inner.blobs)?;
        if used > config.max_usable_space {
            return Err(FsError::QuotaExceeded {
                limit: config.max_usable_space,
                requested: 0,
                usage: used,
            });
        }

        let mut files = Vec::new();
        inner.read_tx(|store| {
            store.walk(&mut |path, record| {
                if let EntryKind::File { content } = &record.kind {
                    files.push((path.to_string(), content.clone(), record.modified));
                }
                Ok(())
            })
        })?;

        let mut stale = Vec::new();
        for (path, blob, recorded) in &files {
            let info = inner.blob_info(path, blob)?;
            if info.modified > *recorded {
                stale.push((path.clone(), info.modified));
            }
        }
        if !stale.is_empty() {
            inner.write_tx(|store| {
                for (path, modified) in &stale {
                    if let Some(mut record) = store.get(path)? {
                        record.modified = *modified;
                        store.put(path, record)?;
                    }
                }
                Ok(())
            })?;
        }
        inner.files.set_used(files.len() as u64);

        info!(
            files = files.len(),
            used_space = used,
            reconciled = stale.len(),
            "opened meta filesystem"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Number of files.
    pub fn file_count(&self) -> u64 {
        self.inner.files.used()
    }

    /// Bytes used by the blobs, possibly cached.
    pub fn used_space(&self) -> Result<u64, FsError> {
        self.inner.space.current(&*self.inner.blobs)
    }

    /// The configuration in effect.
    pub fn config(&self) -> MetaConfig {
        self.inner.config
    }
}

impl FsFiles for MetaFs {
    fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        permissions: Permissions,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let existing = {
            let _structure = inner.structure.read();
            match inner.existing(&path, flags)? {
                Some((blob, permissions, created, modified)) => {
                    Some((inner.open_blob(&path, &blob)?, permissions, created, modified))
                }
                None => None,
            }
        };
        let (blob, permissions, created, modified) = match existing {
            Some(found) => found,
            None if !flags.create => return Err(FsError::not_found(&path)),
            None => {
                let (blob, created) = inner.create_file(&path, permissions)?;
                (blob, permissions, created, created)
            }
        };

        let file = MetaFile::open(
            Arc::clone(inner),
            &path,
            flags,
            permissions,
            created,
            modified,
            blob,
        )?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let from = path::normalize_path(from);
        let to = path::normalize_path(to);

        let _structure = inner.structure.write();
        let now = SystemTime::now();
        let (moves, is_dir) = inner.write_tx(|store| {
            let moves = store.rename_entry(&from, &to, now)?;
            let is_dir = store.get(&to)?.is_some_and(|record| record.is_dir());
            Ok((moves, is_dir))
        })?;
        inner.handles.rename_prefix(&from, &to);
        {
            let mut mtimes = inner.mtimes.write();
            for (old, new) in &moves {
                if let Some(at) = mtimes.remove(old) {
                    mtimes.insert(new.clone(), at);
                }
            }
        }
        let event = if is_dir {
            Event::dir(&to, EventOps::RENAME)
        } else {
            Event::file(&to, EventOps::RENAME)
        };
        inner.events.push(event);
        debug!(%from, %to, moved = moves.len(), "renamed");
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let _structure = inner.structure.write();
        let record = inner.write_tx(|store| store.remove_entry(&path, SystemTime::now()))?;
        match &record.kind {
            EntryKind::File { content } => {
                inner.files.release(1);
                inner.mtimes.write().remove(&path);
                let size = inner.blobs.stat(content.as_str()).map_or(0, |info| info.size);
                match inner.blobs.remove(content.as_str()) {
                    Ok(()) => inner.space.release(size),
                    Err(err) => warn!(%path, blob = %content, error = %err, "failed to remove blob"),
                }
                inner.events.push(Event::file(&path, EventOps::REMOVE));
            }
            EntryKind::Directory { .. } => inner.events.push(Event::dir(&path, EventOps::REMOVE)),
        }
        Ok(())
    }
}

impl FsDir for MetaFs {
    fn read_dir(&self, path: &Path) -> Result<ReadDirIter, FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let _structure = inner.structure.read();
        let entries = inner.read_tx(|store| {
            let names = store.list_children(&path)?;
            Ok(names
                .into_iter()
                .map(|name| {
                    let child = path::child(&path, &name);
                    let record = store.get(&child)?.ok_or_else(|| FsError::CorruptedData {
                        path: child.clone().into(),
                        details: format!("listed by {path} but has no record"),
                    })?;
                    inner.describe(&child, &record).map(DirEntry::from)
                })
                .collect::<Vec<_>>())
        })?;
        Ok(ReadDirIter::from_vec(entries))
    }

    fn mkdir_all(&self, path: &Path, permissions: Permissions) -> Result<(), FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let _structure = inner.structure.write();
        let created = inner.write_tx(|store| store.mkdir_all(&path, permissions, SystemTime::now()))?;
        if created.includes(&path) {
            inner.events.push(Event::dir(&path, EventOps::CREATE));
        }
        Ok(())
    }
}

impl FsStat for MetaFs {
    fn stat(&self, path: &Path) -> Result<Metadata, FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let _structure = inner.structure.read();
        let record = inner
            .read_tx(|store| store.get(&path))?
            .ok_or_else(|| FsError::not_found(&path))?;
        inner.describe(&path, &record)
    }
}

impl FsLifecycle for MetaFs {
    fn close(&self) -> Result<(), FsError> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_close() {
            return Err(FsError::ClosedFilesystem);
        }
        if let Some(registry) = &inner.registry {
            registry.deregister(inner.registry_id);
        }
        inner.watchers.close_all();
        inner.events.clear();

        let open = inner.handles.drain();
        for (shared, blob) in &open {
            if let Err(err) = blob.sync() {
                warn!(path = %shared.path(), error = %err, "failed to sync open file");
            }
        }
        let modified: Vec<(String, SystemTime)> = {
            let mtimes = inner.mtimes.read();
            mtimes.iter().map(|(path, at)| (path.clone(), *at)).collect()
        };
        if !modified.is_empty() {
            let _structure = inner.structure.write();
            let persisted = inner.write_tx(|store| {
                for (path, at) in &modified {
                    if let Some(mut record) = store.get(path)? {
                        if !record.is_dir() && record.modified < *at {
                            record.modified = *at;
                            store.put(path, record)?;
                        }
                    }
                }
                Ok(())
            });
            if let Err(err) = persisted {
                warn!(error = %err, "failed to record modification times");
            }
        }

        let result = inner.kv.close();
        inner.lifecycle.finish_close();
        info!(open_handles = open.len(), "closed meta filesystem");
        result
    }

    fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }
}

impl FsWatch for MetaFs {
    fn watch(&self, filter: PathPattern) -> Result<Watcher, FsError> {
        self.inner.lifecycle.check()?;
        let registry = self.inner.registry.as_ref().ok_or(FsError::NotSupported {
            operation: "watch without a registry",
        })?;
        let watcher = Watcher::new(filter);
        self.inner.watchers.add(watcher.clone());
        let backend: Weak<MetaInner> = Arc::downgrade(&self.inner);
        registry.register(self.inner.registry_id, backend);
        Ok(watcher)
    }
}

impl FsSnapshot for MetaFs {
    fn take_snapshot(&self, config: &SnapshotConfig) -> Result<Snapshot, FsError> {
        let inner = &self.inner;
        inner.lifecycle.check()?;
        let _running = inner.snapshot_flag.begin()?;
        let _structure = inner.structure.read();

        let used = inner.space.current(&*inner.blobs)?;
        if used > META_MAX_SNAPSHOTABLE_SIZE {
            return Err(FsError::SnapshotTooLarge {
                size: used,
                limit: META_MAX_SNAPSHOTABLE_SIZE,
            });
        }

        let snapshot = inner.read_tx(|store| {
            let source = MetaCapture { inner, store };
            snapshot::capture(&source, config)
        })?;
        debug!(entries = snapshot.len(), bytes = snapshot.size(), "took meta snapshot");
        Ok(snapshot)
    }
}

struct MetaCapture<'a, 't> {
    inner: &'a MetaInner,
    store: &'a TxStore<'t>,
}

impl<'t> CaptureSource for MetaCapture<'_, 't> {
    type Store = TxStore<'t>;
    type Writer = Arc<dyn Blob>;

    fn store(&self) -> &TxStore<'t> {
        self.store
    }

    fn writers(&self) -> Vec<(String, Arc<dyn Blob>)> {
        self.inner.handles.writable(|_| true)
    }

    fn set_capturing(&self, _writer: &Arc<dyn Blob>, _capturing: bool) {}

    fn flush(&self, _path: &str, writer: &Arc<dyn Blob>) -> Result<Vec<u8>, FsError> {
        writer.sync()?;
        blob::read_all(&**writer)
    }

    fn describe(&self, path: &str, record: &EntryRecord<BlobName>) -> Result<Metadata, FsError> {
        self.inner.describe(path, record)
    }

    fn read(&self, path: &str, record: &EntryRecord<BlobName>) -> Result<Vec<u8>, FsError> {
        match record.content() {
            Some(name) => blob::read_all(&*self.inner.open_blob(path, name)?),
            None => Ok(Vec::new()),
        }
    }
}
