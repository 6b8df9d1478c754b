//! # In-Memory Backend
//!
//! ## Overview
//!
//! [`MemoryFs`] keeps the whole tree in process memory: one ordered map of
//! normalized path to record, guarded by a single structural lock, and one
//! [`MemContent`] buffer per file with its own lock. Every byte a file
//! grows by is charged to an atomic quota before the buffer changes.
//!
//! | Operation | Lock | Events |
//! |-----------|------|--------|
//! | open (new file) | write | create |
//! | open (existing) | read | write, if truncated |
//! | handle write / truncate | content only | write |
//! | rename | write | rename, on the destination |
//! | remove | write | remove |
//! | mkdir_all | write | create, if the path was created |
//! | snapshot | read | none |
//!
//! Cloning a [`MemoryFs`] yields another reference to the same tree.
//!
//! ## Example
//!
//! ```rust
//! use anyfs_store::{FileHandle, FsFiles, FsStat, MemoryConfig, MemoryFs};
//! use std::path::Path;
//!
//! let fs = MemoryFs::new(MemoryConfig::default()).unwrap();
//! let mut file = fs.create(Path::new("/notes/today.txt")).unwrap();
//! file.write(b"hello").unwrap();
//! file.close().unwrap();
//!
//! assert_eq!(fs.stat(Path::new("/notes/today.txt")).unwrap().size, 5);
//! assert_eq!(fs.used_bytes(), 5);
//! ```

mod content;
mod file;

pub use content::MemContent;
pub use file::MemFile;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::MemoryConfig;
use crate::event::{Event, EventOps, EventQueue};
use crate::handle::HandleTable;
use crate::index::{EntryKind, EntryRecord, Hierarchy};
use crate::lifecycle::Lifecycle;
use crate::quota::{Quota, SnapshotFlag};
use crate::snapshot::{self, CaptureSource, Snapshot, SnapshotConfig};
use crate::watch::{Watchable, Watcher, WatcherList, WatchRegistry};
use crate::{
    DirEntry, FileHandle, FsDir, FsError, FsFiles, FsLifecycle, FsSnapshot, FsStat,
    FsWatch, Metadata, OpenFlags, PathPattern, Permissions, ReadDirIter, path,
};

type Records = BTreeMap<String, EntryRecord<Arc<MemContent>>>;

pub(crate) struct MemoryInner {
    records: RwLock<Records>,
    quota: Arc<Quota>,
    events: EventQueue,
    handles: HandleTable<Arc<MemContent>>,
    watchers: WatcherList,
    registry: Option<WatchRegistry>,
    registry_id: u64,
    lifecycle: Lifecycle,
    snapshot_flag: SnapshotFlag,
}

impl MemoryInner {
    fn existing(
        records: &Records,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Option<(Arc<MemContent>, Permissions)>, FsError> {
        let Some(record) = records.get(path) else {
            return Ok(None);
        };
        if flags.create && flags.exclusive {
            return Err(FsError::exists(path, "open"));
        }
        match &record.kind {
            EntryKind::Directory { .. } => Err(FsError::CannotOpenDirectory { path: path.into() }),
            EntryKind::File { content } => Ok(Some((Arc::clone(content), record.permissions))),
        }
    }

    fn content_for_open(
        &self,
        path: &str,
        flags: OpenFlags,
        permissions: Permissions,
    ) -> Result<(Arc<MemContent>, Permissions), FsError> {
        if let Some(found) = Self::existing(&self.records.read(), path, flags)? {
            return Ok(found);
        }
        if !flags.create {
            return Err(FsError::not_found(path));
        }

        let mut records = self.records.write();
        if let Some(found) = Self::existing(&records, path, flags)? {
            return Ok(found);
        }
        let now = SystemTime::now();
        let content = Arc::new(MemContent::new(Arc::clone(&self.quota), now));
        let record = EntryRecord::file(permissions, Arc::clone(&content), now);
        let created = records.create_entry(path, record, now)?;
        if !created.dirs.is_empty() {
            debug!(path, parents = ?created.dirs, "materialized parent directories");
        }
        self.events.push(Event::file(path, EventOps::CREATE));
        Ok((content, permissions))
    }
}

impl Watchable for MemoryInner {
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

fn describe(path: &str, record: &EntryRecord<Arc<MemContent>>) -> Metadata {
    let (size, modified) = match &record.kind {
        EntryKind::File { content } => (content.len(), content.modified()),
        EntryKind::Directory { .. } => (0, record.modified),
    };
    Metadata {
        name: path::basename(path).to_string(),
        path: path.into(),
        file_type: record.file_type(),
        size,
        permissions: record.permissions,
        created: record.created,
        modified,
    }
}

/// In-memory filesystem with a byte quota.
///
/// # Thread Safety
///
/// Structural operations take the tree lock; reads and writes through open
/// handles only lock the content of their file.
#[derive(Clone)]
pub struct MemoryFs {
    inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFs")
            .field("entries", &self.inner.records.read().len())
            .field("used_bytes", &self.used_bytes())
            .field("max_storage", &self.max_storage())
            .field("open_handles", &self.inner.handles.len())
            .field("closed", &self.inner.lifecycle.is_closed())
            .finish()
    }
}

impl MemoryFs {
    /// Empty filesystem without event delivery.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidConfig`] if the quota is out of bounds
    pub fn new(config: MemoryConfig) -> Result<Self, FsError> {
        Self::build(config, None)
    }

    /// Empty filesystem whose watchers are served by `registry`.
    pub fn with_registry(config: MemoryConfig, registry: WatchRegistry) -> Result<Self, FsError> {
        Self::build(config, Some(registry))
    }

    /// Filesystem holding the tree of `snapshot`, with its exact times,
    /// permissions and bytes.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidConfig`] if the quota is out of bounds
    /// - [`FsError::QuotaExceeded`] if the captured bytes do not fit
    pub fn from_snapshot(snapshot: &Snapshot, config: MemoryConfig) -> Result<Self, FsError> {
        let fs = Self::build(config, None)?;
        {
            let mut records = fs.inner.records.write();
            snapshot.for_each_entry(|entry| {
                let key = entry.normalized_path();
                let kind = if entry.is_dir() {
                    EntryKind::Directory {
                        children: entry.child_names.iter().cloned().collect(),
                    }
                } else {
                    let bytes = snapshot.content(&key)?.bytes().to_vec();
                    let content = MemContent::restored(
                        Arc::clone(&fs.inner.quota),
                        bytes,
                        entry.created,
                        entry.modified,
                    )?;
                    EntryKind::File {
                        content: Arc::new(content),
                    }
                };
                records.insert(
                    key,
                    EntryRecord {
                        permissions: entry.permissions,
                        created: entry.created,
                        modified: entry.modified,
                        kind,
                    },
                );
                Ok(())
            })?;
        }
        info!(entries = snapshot.len(), bytes = snapshot.size(), "restored memory filesystem");
        Ok(fs)
    }

    fn build(config: MemoryConfig, registry: Option<WatchRegistry>) -> Result<Self, FsError> {
        config.validate()?;
        let policy = registry
            .as_ref()
            .map(WatchRegistry::retention_policy)
            .unwrap_or_default();
        let registry_id = registry.as_ref().map_or(0, WatchRegistry::allocate_id);

        let mut records = Records::new();
        records.ensure_root(SystemTime::now())?;

        info!(max_storage = config.max_storage, "created memory filesystem");
        Ok(Self {
            inner: Arc::new(MemoryInner {
                records: RwLock::new(records),
                quota: Arc::new(Quota::new(config.max_storage)),
                events: EventQueue::new(policy),
                handles: HandleTable::default(),
                watchers: WatcherList::default(),
                registry,
                registry_id,
                lifecycle: Lifecycle::default(),
                snapshot_flag: SnapshotFlag::default(),
            }),
        })
    }

    /// Bytes currently charged to the quota.
    pub fn used_bytes(&self) -> u64 {
        self.inner.quota.used()
    }

    /// The byte quota.
    pub fn max_storage(&self) -> u64 {
        self.inner.quota.limit()
    }

    /// Hand every dirty file to `persist`. Returns the number of files
    /// visited.
    ///
    /// A file becomes clean only if `persist` succeeds for it and it was not
    /// written meanwhile. Stops at the first error.
    pub fn persist_dirty<F>(&self, mut persist: F) -> Result<usize, FsError>
    where
        F: FnMut(&str, &[u8]) -> Result<(), FsError>,
    {
        self.inner.lifecycle.check()?;
        let dirty: Vec<(String, Arc<MemContent>)> = self
            .inner
            .records
            .read()
            .iter()
            .filter_map(|(path, record)| {
                record
                    .content()
                    .filter(|content| content.should_be_persisted())
                    .map(|content| (path.clone(), Arc::clone(content)))
            })
            .collect();

        for (path, content) in &dirty {
            content.persist(|bytes| persist(path, bytes))?;
        }
        Ok(dirty.len())
    }
}

impl FsFiles for MemoryFs {
    fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        permissions: Permissions,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        self.inner.lifecycle.check()?;
        let path = path::normalize_path(path);
        let (content, permissions) = self.inner.content_for_open(&path, flags, permissions)?;
        let file = MemFile::open(Arc::clone(&self.inner), &path, flags, permissions, content)?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.inner.lifecycle.check()?;
        let from = path::normalize_path(from);
        let to = path::normalize_path(to);

        let mut records = self.inner.records.write();
        let moves = records.rename_entry(&from, &to, SystemTime::now())?;
        self.inner.handles.rename_prefix(&from, &to);
        let event = match records.get(&to) {
            Some(record) if record.is_dir() => Event::dir(&to, EventOps::RENAME),
            _ => Event::file(&to, EventOps::RENAME),
        };
        self.inner.events.push(event);
        debug!(%from, %to, moved = moves.len(), "renamed");
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        self.inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let mut records = self.inner.records.write();
        let record = Hierarchy::remove_entry(&mut *records, &path, SystemTime::now())?;
        let event = match &record.kind {
            EntryKind::File { content } => {
                content.detach();
                Event::file(&path, EventOps::REMOVE)
            }
            EntryKind::Directory { .. } => Event::dir(&path, EventOps::REMOVE),
        };
        self.inner.events.push(event);
        Ok(())
    }
}

impl FsDir for MemoryFs {
    fn read_dir(&self, path: &Path) -> Result<ReadDirIter, FsError> {
        self.inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let records = self.inner.records.read();
        let record = records.get(&path).ok_or_else(|| FsError::not_found(&path))?;
        let Some(children) = record.children() else {
            return Err(FsError::NotADirectory { path: path.into() });
        };
        let entries = children
            .iter()
            .map(|name| {
                let child = path::child(&path, name);
                records
                    .get(&child)
                    .map(|record| DirEntry::from(describe(&child, record)))
                    .ok_or_else(|| FsError::CorruptedData {
                        path: child.into(),
                        details: format!("listed by {path} but has no record"),
                    })
            })
            .collect();
        Ok(ReadDirIter::from_vec(entries))
    }

    fn mkdir_all(&self, path: &Path, permissions: Permissions) -> Result<(), FsError> {
        self.inner.lifecycle.check()?;
        let path = path::normalize_path(path);

        let mut records = self.inner.records.write();
        let created = records.mkdir_all(&path, permissions, SystemTime::now())?;
        if created.includes(&path) {
            self.inner.events.push(Event::dir(&path, EventOps::CREATE));
        }
        Ok(())
    }
}

impl FsStat for MemoryFs {
    fn stat(&self, path: &Path) -> Result<Metadata, FsError> {
        self.inner.lifecycle.check()?;
        let path = path::normalize_path(path);
        let records = self.inner.records.read();
        let record = records.get(&path).ok_or_else(|| FsError::not_found(&path))?;
        Ok(describe(&path, record))
    }
}

impl FsLifecycle for MemoryFs {
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
        inner.lifecycle.finish_close();
        info!(open_handles = open.len(), "closed memory filesystem");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }
}

impl FsWatch for MemoryFs {
    fn watch(&self, filter: PathPattern) -> Result<Watcher, FsError> {
        self.inner.lifecycle.check()?;
        let registry = self.inner.registry.as_ref().ok_or(FsError::NotSupported {
            operation: "watch without a registry",
        })?;
        let watcher = Watcher::new(filter);
        self.inner.watchers.add(watcher.clone());
        let backend: Weak<MemoryInner> = Arc::downgrade(&self.inner);
        registry.register(self.inner.registry_id, backend);
        Ok(watcher)
    }
}

impl FsSnapshot for MemoryFs {
    fn take_snapshot(&self, config: &SnapshotConfig) -> Result<Snapshot, FsError> {
        self.inner.lifecycle.check()?;
        let _running = self.inner.snapshot_flag.begin()?;
        let records = self.inner.records.read();
        let source = MemoryCapture {
            inner: &self.inner,
            records: &records,
        };
        let snapshot = snapshot::capture(&source, config)?;
        debug!(entries = snapshot.len(), bytes = snapshot.size(), "took memory snapshot");
        Ok(snapshot)
    }
}

struct MemoryCapture<'a> {
    inner: &'a MemoryInner,
    records: &'a Records,
}

impl CaptureSource for MemoryCapture<'_> {
    type Store = Records;
    type Writer = Arc<MemContent>;

    fn store(&self) -> &Records {
        self.records
    }

    fn writers(&self) -> Vec<(String, Arc<MemContent>)> {
        self.inner.handles.writable(|_| true)
    }

    fn set_capturing(&self, writer: &Arc<MemContent>, capturing: bool) {
        writer.set_capturing(capturing);
    }

    fn flush(&self, _path: &str, writer: &Arc<MemContent>) -> Result<Vec<u8>, FsError> {
        Ok(writer.bytes())
    }

    fn describe(
        &self,
        path: &str,
        record: &EntryRecord<Arc<MemContent>>,
    ) -> Result<Metadata, FsError> {
        Ok(describe(path, record))
    }

    fn read(&self, _path: &str, record: &EntryRecord<Arc<MemContent>>) -> Result<Vec<u8>, FsError> {
        Ok(record.content().map(|content| content.bytes()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileType;
    use std::io::SeekFrom;

    fn fs() -> MemoryFs {
        MemoryFs::new(MemoryConfig::default()).unwrap()
    }

    fn write(fs: &MemoryFs, path: &str, data: &[u8]) {
        let mut file = fs.create(Path::new(path)).unwrap();
        file.write(data).unwrap();
        file.close().unwrap();
    }

    fn read(fs: &MemoryFs, path: &str) -> Vec<u8> {
        let mut file = fs.open(Path::new(path)).unwrap();
        let mut out = vec![0; file.stat().unwrap().size as usize];
        let n = file.read(&mut out).unwrap();
        out.truncate(n);
        out
    }

    fn drained_paths(fs: &MemoryFs) -> Vec<String> {
        fs.inner.events.drain().into_iter().map(|e| e.path).collect()
    }

    #[test]
    fn quota_bounds_are_validated() {
        assert!(matches!(
            MemoryFs::new(MemoryConfig::with_max_storage(50)),
            Err(FsError::InvalidConfig { .. })
        ));
        assert!(MemoryFs::new(MemoryConfig::with_max_storage(51)).is_ok());
    }

    #[test]
    fn root_is_private_directory() {
        let fs = fs();
        let root = fs.stat(Path::new("/")).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.permissions.mode(), 0o700);
        assert_eq!(root.name, "/");
    }

    #[test]
    fn open_missing_without_create_fails() {
        let fs = fs();
        assert!(matches!(
            fs.open(Path::new("/missing")),
            Err(FsError::NotFound { .. })
        ));
    }

    #[test]
    fn create_materializes_parents_and_emits_one_event() {
        let fs = fs();
        write(&fs, "/a/b/c.txt", b"x");
        assert!(fs.stat(Path::new("/a/b")).unwrap().is_dir());
        assert_eq!(drained_paths(&fs), vec!["/a/b/c.txt", "/a/b/c.txt"]);
    }

    #[test]
    fn exclusive_open_of_existing_file_fails() {
        let fs = fs();
        write(&fs, "/f", b"");
        assert!(matches!(
            fs.open_file(Path::new("/f"), OpenFlags::CREATE_NEW, Permissions::default_file()),
            Err(FsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn opening_a_directory_fails() {
        let fs = fs();
        fs.mkdir_all(Path::new("/d"), Permissions::default_dir()).unwrap();
        assert!(matches!(
            fs.open(Path::new("/d")),
            Err(FsError::CannotOpenDirectory { .. })
        ));
    }

    #[test]
    fn create_below_a_file_fails() {
        let fs = fs();
        write(&fs, "/f", b"");
        assert!(matches!(
            fs.create(Path::new("/f/g")),
            Err(FsError::NotADirectory { .. })
        ));
    }

    #[test]
    fn duplicate_handles_share_content() {
        let fs = fs();
        let mut a = fs.create(Path::new("/shared")).unwrap();
        let b = fs.open(Path::new("/shared")).unwrap();
        a.write(b"one").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(b.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(&buf, b"one");
    }

    #[test]
    fn truncate_on_open_empties_shared_content() {
        let fs = fs();
        write(&fs, "/t", b"content");
        let flags = OpenFlags {
            truncate: true,
            ..OpenFlags::CREATE
        };
        let file = fs.open_file(Path::new("/t"), flags, Permissions::default_file()).unwrap();
        assert_eq!(file.stat().unwrap().size, 0);
        assert_eq!(fs.used_bytes(), 0);
    }

    #[test]
    fn append_seeds_cursor_at_end() {
        let fs = fs();
        write(&fs, "/log", b"abc");
        let mut file = fs
            .open_file(Path::new("/log"), OpenFlags::APPEND, Permissions::default_file())
            .unwrap();
        file.write(b"def").unwrap();
        file.close().unwrap();
        assert_eq!(read(&fs, "/log"), b"abcdef");
    }

    #[test]
    fn write_over_quota_leaves_state_unchanged() {
        let fs = MemoryFs::new(MemoryConfig::with_max_storage(60)).unwrap();
        let mut file = fs.create(Path::new("/big")).unwrap();
        file.write(&[7; 50]).unwrap();
        assert!(matches!(
            file.write(&[8; 20]),
            Err(FsError::QuotaExceeded { limit: 60, .. })
        ));
        assert_eq!(file.stat().unwrap().size, 50);
        assert_eq!(fs.used_bytes(), 50);
    }

    #[test]
    fn remove_releases_quota_even_with_open_handle() {
        let fs = fs();
        let mut file = fs.create(Path::new("/gone")).unwrap();
        file.write(&[1; 100]).unwrap();
        fs.remove(Path::new("/gone")).unwrap();
        assert_eq!(fs.used_bytes(), 0);
        drop(file);
        assert_eq!(fs.used_bytes(), 0);
    }

    #[test]
    fn remove_non_empty_directory_fails() {
        let fs = fs();
        write(&fs, "/d/f", b"");
        assert!(matches!(
            fs.remove(Path::new("/d")),
            Err(FsError::DirectoryNotEmpty { .. })
        ));
        fs.remove(Path::new("/d/f")).unwrap();
        fs.inner.events.clear();
        fs.remove(Path::new("/d")).unwrap();
        assert_eq!(drained_paths(&fs), vec!["/d/"]);
    }

    #[test]
    fn rename_moves_subtree_and_open_handles_follow() {
        let fs = fs();
        write(&fs, "/src/keep.txt", b"kept");
        let mut open = fs
            .open_file(Path::new("/src/keep.txt"), OpenFlags::READ_WRITE, Permissions::default_file())
            .unwrap();
        fs.inner.events.clear();

        fs.rename(Path::new("/src"), Path::new("/dst")).unwrap();
        assert!(matches!(fs.stat(Path::new("/src")), Err(FsError::NotFound { .. })));
        assert_eq!(read(&fs, "/dst/keep.txt"), b"kept");
        assert_eq!(open.path(), "/dst/keep.txt");
        assert_eq!(drained_paths(&fs), vec!["/dst/"]);

        open.seek(SeekFrom::End(0)).unwrap();
        open.write(b"!").unwrap();
        assert_eq!(read(&fs, "/dst/keep.txt"), b"kept!");
    }

    #[test]
    fn rename_onto_existing_fails() {
        let fs = fs();
        write(&fs, "/a", b"");
        write(&fs, "/b", b"");
        assert!(matches!(
            fs.rename(Path::new("/a"), Path::new("/b")),
            Err(FsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn failed_rename_keeps_source_listed() {
        let fs = fs();
        write(&fs, "/f", b"four");
        write(&fs, "/file", b"");
        fs.inner.events.clear();

        assert!(matches!(
            fs.rename(Path::new("/f"), Path::new("/file/inner")),
            Err(FsError::NotADirectory { .. })
        ));
        let names: Vec<String> = fs
            .read_dir(Path::new("/"))
            .unwrap()
            .map(|e| e.unwrap().name)
            .collect();
        assert_eq!(names, vec!["f", "file"]);
        assert_eq!(read(&fs, "/f"), b"four");
        let snapshot = fs.take_snapshot(&SnapshotConfig::all()).unwrap();
        assert!(snapshot.metadata("/f").is_ok());
        assert!(drained_paths(&fs).is_empty());
    }

    #[test]
    fn read_dir_is_sorted_and_reports_sizes() {
        let fs = fs();
        write(&fs, "/z", b"zz");
        write(&fs, "/a", b"a");
        fs.mkdir_all(Path::new("/m"), Permissions::default_dir()).unwrap();
        let entries = fs.read_dir(Path::new("/")).unwrap().collect_all().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
        assert_eq!(entries[2].size, 2);
        assert_eq!(entries[1].file_type, FileType::Directory);
    }

    #[test]
    fn read_dir_of_file_fails() {
        let fs = fs();
        write(&fs, "/f", b"");
        assert!(matches!(
            fs.read_dir(Path::new("/f")),
            Err(FsError::NotADirectory { .. })
        ));
    }

    #[test]
    fn mkdir_all_emits_event_only_when_created() {
        let fs = fs();
        fs.mkdir_all(Path::new("/x/y"), Permissions::default_dir()).unwrap();
        fs.mkdir_all(Path::new("/x/y"), Permissions::default_dir()).unwrap();
        assert_eq!(drained_paths(&fs), vec!["/x/y/"]);
    }

    #[test]
    fn close_twice_and_operations_after_close_fail() {
        let fs = fs();
        let mut file = fs.create(Path::new("/f")).unwrap();
        fs.close().unwrap();
        assert!(fs.is_closed());
        assert!(matches!(fs.close(), Err(FsError::ClosedFilesystem)));
        assert!(matches!(
            fs.stat(Path::new("/")),
            Err(FsError::ClosedFilesystem)
        ));
        assert!(matches!(file.write(b"x"), Err(FsError::FileClosed { .. })));
    }

    #[test]
    fn watch_without_registry_is_not_supported() {
        let fs = fs();
        assert!(matches!(
            fs.watch(PathPattern::everything()),
            Err(FsError::NotSupported { .. })
        ));
    }

    #[test]
    fn snapshot_captures_unflushed_writes_and_is_isolated() {
        let fs = fs();
        let mut file = fs.create(Path::new("/open.txt")).unwrap();
        file.write(b"before").unwrap();

        let snapshot = fs.take_snapshot(&SnapshotConfig::all()).unwrap();
        file.write(b" after").unwrap();

        assert_eq!(snapshot.content("/open.txt").unwrap().bytes(), b"before");
        assert_eq!(read(&fs, "/open.txt"), b"before after");
    }

    #[test]
    fn overlapping_snapshot_is_refused() {
        let fs = fs();
        write(&fs, "/a", b"a");
        let running = fs.inner.snapshot_flag.begin().unwrap();
        assert!(matches!(
            fs.take_snapshot(&SnapshotConfig::all()),
            Err(FsError::SnapshotInProgress)
        ));
        drop(running);
        assert_eq!(fs.take_snapshot(&SnapshotConfig::all()).unwrap().len(), 2);
    }

    #[test]
    fn from_snapshot_keeps_times_and_modes() {
        let fs = fs();
        write(&fs, "/d/f", b"payload");
        fs.mkdir_all(Path::new("/empty"), Permissions::from_mode(0o750)).unwrap();
        let snapshot = fs.take_snapshot(&SnapshotConfig::all()).unwrap();

        let copy = MemoryFs::from_snapshot(&snapshot, MemoryConfig::default()).unwrap();
        let original = fs.stat(Path::new("/d/f")).unwrap();
        let restored = copy.stat(Path::new("/d/f")).unwrap();
        assert_eq!(original.modified, restored.modified);
        assert_eq!(original.created, restored.created);
        assert_eq!(copy.stat(Path::new("/empty")).unwrap().permissions.mode(), 0o750);
        assert_eq!(read(&copy, "/d/f"), b"payload");
        assert_eq!(copy.used_bytes(), 7);
    }

    #[test]
    fn persist_dirty_visits_written_files_once() {
        let fs = fs();
        write(&fs, "/p", b"data");
        let mut seen = Vec::new();
        let visited = fs
            .persist_dirty(|path, bytes| {
                seen.push((path.to_string(), bytes.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(seen, vec![("/p".to_string(), b"data".to_vec())]);
        assert_eq!(fs.persist_dirty(|_, _| Ok(())).unwrap(), 0);
    }
}
