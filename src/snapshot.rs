//! # Snapshots
//!
//! ## Overview
//!
//! A [`Snapshot`] is an immutable deep copy of part of a filesystem: the
//! entries accepted by a [`SnapshotConfig`] plus every ancestor directory of
//! those entries (the root is always present). Later mutations of the source
//! never show through.
//!
//! Both backends build snapshots with the same algorithm, run under their
//! structural lock:
//!
//! 1. find the open handles allowing writes whose path is included and mark
//!    their content as being captured;
//! 2. flush each one and read its bytes back;
//! 3. walk the tree and collect the included paths;
//! 4. add every ancestor of an included path;
//! 5. walk again and record every included entry, directory child lists
//!    restricted to included children;
//! 6. clear the marks, on every exit path.
//!
//! Identical contents inside one snapshot share a single buffer.
//!
//! ## Example
//!
//! ```rust
//! use anyfs_store::{FsExt, FsSnapshot, MemoryConfig, MemoryFs, SnapshotConfig};
//! use std::path::Path;
//!
//! let fs = MemoryFs::new(MemoryConfig::default()).unwrap();
//! fs.write_file(Path::new("/docs/a.txt"), b"alpha").unwrap();
//! fs.write_file(Path::new("/tmp/b.txt"), b"beta").unwrap();
//!
//! let snapshot = fs.take_snapshot(&SnapshotConfig::including(["/docs/..."])).unwrap();
//! assert!(snapshot.metadata("/docs/a.txt").is_ok());
//! assert!(snapshot.metadata("/tmp").is_err());
//!
//! let copy = snapshot.new_adapted_filesystem(0).unwrap();
//! assert_eq!(copy.read_file(Path::new("/docs/a.txt")).unwrap(), b"alpha");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::config::{MEMORY_MIN_STORAGE, MemoryConfig};
use crate::index::{EntryKind, EntryRecord, Hierarchy, RecordStore};
use crate::{FileType, Fs, FsError, MemoryFs, Metadata, OpenFlags, PathPattern, Permissions, path};

/// SHA-256 digest.
pub type Checksum = [u8; 32];

/// Checksum reported for directories.
pub const ZERO_CHECKSUM: Checksum = [0; 32];

/// Metadata of one captured entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshotMetadata {
    /// Absolute path; directory paths end with `/`.
    pub path: String,
    /// Kind of entry.
    pub file_type: FileType,
    /// Permission bits.
    pub permissions: Permissions,
    /// Size in bytes, 0 for directories.
    pub size: u64,
    /// Creation time.
    pub created: SystemTime,
    /// Last modification time.
    pub modified: SystemTime,
    /// SHA-256 of the content, all zeros for directories.
    pub checksum: Checksum,
    /// Names of the captured children, sorted. Empty for files.
    pub child_names: Vec<String>,
}

impl EntrySnapshotMetadata {
    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Normalized path, without trailing separator.
    pub fn normalized_path(&self) -> String {
        path::normalize(&self.path)
    }

    /// Base name; `/` for the root.
    pub fn name(&self) -> String {
        path::basename(&self.normalized_path()).to_string()
    }

    /// Full Unix mode, type bit included.
    pub fn mode(&self) -> u32 {
        self.file_type.with_permissions(self.permissions)
    }

    /// The entry as regular filesystem [`Metadata`].
    pub fn to_metadata(&self) -> Metadata {
        let normalized = self.normalized_path();
        Metadata {
            name: path::basename(&normalized).to_string(),
            path: PathBuf::from(normalized),
            file_type: self.file_type,
            size: self.size,
            permissions: self.permissions,
            created: self.created,
            modified: self.modified,
        }
    }
}

/// Captured bytes of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotContent {
    bytes: Arc<[u8]>,
    checksum: Checksum,
}

impl SnapshotContent {
    /// The bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A reader over the bytes.
    pub fn reader(&self) -> Cursor<Arc<[u8]>> {
        Cursor::new(Arc::clone(&self.bytes))
    }

    /// SHA-256 of the bytes.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns `true` if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug)]
struct SnapshotInner {
    entries: BTreeMap<String, EntrySnapshotMetadata>,
    contents: HashMap<String, SnapshotContent>,
    size: u64,
    taken_at: SystemTime,
}

/// An immutable capture of a filesystem subtree.
///
/// Cloning is cheap; clones share the captured data.
#[derive(Debug, Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// Metadata of a captured entry. Directory paths are accepted with or
    /// without trailing `/`.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the entry was not captured
    pub fn metadata(&self, path: &str) -> Result<&EntrySnapshotMetadata, FsError> {
        let normalized = path::normalize(path);
        self.inner
            .entries
            .get(&normalized)
            .ok_or_else(|| FsError::not_found(normalized))
    }

    /// Captured content of a file.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the entry was not captured
    /// - [`FsError::CannotOpenDirectory`] for a directory
    pub fn content(&self, path: &str) -> Result<SnapshotContent, FsError> {
        let normalized = path::normalize(path);
        if let Some(content) = self.inner.contents.get(&normalized) {
            return Ok(content.clone());
        }
        match self.inner.entries.get(&normalized) {
            Some(_) => Err(FsError::CannotOpenDirectory {
                path: normalized.into(),
            }),
            None => Err(FsError::not_found(normalized)),
        }
    }

    /// Captured children of `/`, the root itself excluded.
    pub fn root_dir_entries(&self) -> Vec<&EntrySnapshotMetadata> {
        let Some(root) = self.inner.entries.get("/") else {
            return Vec::new();
        };
        root.child_names
            .iter()
            .filter_map(|name| self.inner.entries.get(&path::child("/", name)))
            .collect()
    }

    /// Visit every captured entry in path order, parents before children.
    ///
    /// Stops at the first error returned by `visit`.
    pub fn for_each_entry<F>(&self, mut visit: F) -> Result<(), FsError>
    where
        F: FnMut(&EntrySnapshotMetadata) -> Result<(), FsError>,
    {
        self.entries().try_for_each(|entry| visit(entry))
    }

    /// Captured entries in path order, parents before children.
    pub fn entries(&self) -> impl Iterator<Item = &EntrySnapshotMetadata> + '_ {
        self.inner.entries.values()
    }

    /// Number of captured entries, root included.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Total size of the captured file contents.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// When the capture finished.
    pub fn taken_at(&self) -> SystemTime {
        self.inner.taken_at
    }

    /// A new in-memory filesystem holding the captured tree.
    ///
    /// Its byte quota is the largest of `size_hint`, the captured size and
    /// the minimum accepted quota.
    pub fn new_adapted_filesystem(&self, size_hint: u64) -> Result<MemoryFs, FsError> {
        let max_storage = size_hint.max(self.size()).max(MEMORY_MIN_STORAGE + 1);
        MemoryFs::from_snapshot(self, MemoryConfig::with_max_storage(max_storage))
    }

    /// Replay the captured tree into any filesystem.
    ///
    /// Permissions are kept; times are those of the replay.
    pub fn write_into<F: Fs + ?Sized>(&self, fs: &F) -> Result<(), FsError> {
        self.for_each_entry(|entry| {
            let normalized = entry.normalized_path();
            if normalized == "/" {
                return Ok(());
            }
            let target = PathBuf::from(&normalized);
            if entry.is_dir() {
                return fs.mkdir_all(&target, entry.permissions);
            }
            let content = self.content(&normalized)?;
            let mut file = fs.open_file(&target, OpenFlags::CREATE, entry.permissions)?;
            let mut written = 0;
            while written < content.bytes().len() {
                written += file.write(&content.bytes()[written..])?;
            }
            file.close()
        })
    }
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
enum Inclusion {
    All,
    Patterns(Vec<PathPattern>),
    Predicate(Predicate),
}

/// Which entries a snapshot captures.
#[derive(Clone)]
pub struct SnapshotConfig {
    inclusion: Inclusion,
}

impl std::fmt::Debug for SnapshotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inclusion {
            Inclusion::All => f.write_str("SnapshotConfig(all)"),
            Inclusion::Patterns(patterns) => f.debug_tuple("SnapshotConfig").field(patterns).finish(),
            Inclusion::Predicate(_) => f.write_str("SnapshotConfig(<predicate>)"),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self::all()
    }
}

impl SnapshotConfig {
    /// Capture everything.
    pub fn all() -> Self {
        Self {
            inclusion: Inclusion::All,
        }
    }

    /// Capture the entries matching any of `patterns`.
    pub fn including<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathPattern>,
    {
        Self {
            inclusion: Inclusion::Patterns(patterns.into_iter().map(Into::into).collect()),
        }
    }

    /// Capture the entries whose normalized path `predicate` accepts.
    pub fn filter<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            inclusion: Inclusion::Predicate(Arc::new(predicate)),
        }
    }

    /// Returns `true` if `path` is included.
    pub fn includes(&self, path: &str) -> bool {
        match &self.inclusion {
            Inclusion::All => true,
            Inclusion::Patterns(patterns) => patterns.iter().any(|pattern| pattern.matches(path)),
            Inclusion::Predicate(predicate) => predicate(&path::normalize(path)),
        }
    }
}

type ContentOf<S> = <<S as CaptureSource>::Store as RecordStore>::Content;

/// Backend view used by [`capture`], valid while the structural lock is held.
pub(crate) trait CaptureSource {
    type Store: Hierarchy + ?Sized;
    type Writer;

    fn store(&self) -> &Self::Store;

    /// Every open handle allowing writes, with its current path.
    fn writers(&self) -> Vec<(String, Self::Writer)>;

    fn set_capturing(&self, writer: &Self::Writer, capturing: bool);

    /// Flush a writer and read its bytes back.
    fn flush(&self, path: &str, writer: &Self::Writer) -> Result<Vec<u8>, FsError>;

    fn describe(&self, path: &str, record: &EntryRecord<ContentOf<Self>>) -> Result<Metadata, FsError>;

    fn read(&self, path: &str, record: &EntryRecord<ContentOf<Self>>) -> Result<Vec<u8>, FsError>;
}

struct CaptureMarks<'a, S: CaptureSource> {
    source: &'a S,
    writers: &'a [(String, S::Writer)],
}

impl<S: CaptureSource> Drop for CaptureMarks<'_, S> {
    fn drop(&mut self) {
        for (_, writer) in self.writers {
            self.source.set_capturing(writer, false);
        }
    }
}

/// Build a snapshot of `source`.
pub(crate) fn capture<S: CaptureSource>(
    source: &S,
    config: &SnapshotConfig,
) -> Result<Snapshot, FsError> {
    let writers: Vec<(String, S::Writer)> = source
        .writers()
        .into_iter()
        .filter(|(path, _)| config.includes(path))
        .collect();
    for (_, writer) in &writers {
        source.set_capturing(writer, true);
    }
    let _marks = CaptureMarks {
        source,
        writers: &writers,
    };

    let mut flushed: HashMap<String, Vec<u8>> = HashMap::new();
    for (path, writer) in &writers {
        flushed.insert(path.clone(), source.flush(path, writer)?);
    }

    let store = source.store();
    let mut included: BTreeSet<String> = BTreeSet::new();
    store.walk(&mut |path, record| {
        let reported = if record.is_dir() {
            path::as_dir_path(path)
        } else {
            path.to_string()
        };
        if config.includes(&reported) {
            included.insert(path.to_string());
        }
        Ok(())
    })?;

    let ancestors: Vec<String> = included
        .iter()
        .flat_map(|path| path::ancestors(path).map(str::to_string).collect::<Vec<_>>())
        .collect();
    included.extend(ancestors);
    included.insert("/".to_string());

    let mut builder = SnapshotBuilder::default();
    store.walk(&mut |path, record| {
        if !included.contains(path) {
            return Ok(());
        }
        let metadata = source.describe(path, record)?;
        match &record.kind {
            EntryKind::Directory { children } => {
                let child_names = children
                    .iter()
                    .filter(|name| included.contains(&path::child(path, name)))
                    .cloned()
                    .collect();
                builder.directory(metadata, child_names);
            }
            EntryKind::File { .. } => {
                let bytes = match flushed.remove(path) {
                    Some(bytes) => bytes,
                    None => source.read(path, record)?,
                };
                builder.file(metadata, bytes);
            }
        }
        Ok(())
    })?;

    Ok(builder.finish())
}

#[derive(Default)]
struct SnapshotBuilder {
    entries: BTreeMap<String, EntrySnapshotMetadata>,
    contents: HashMap<String, SnapshotContent>,
    buffers: HashMap<Checksum, Arc<[u8]>>,
    size: u64,
}

impl SnapshotBuilder {
    fn directory(&mut self, metadata: Metadata, child_names: Vec<String>) {
        let normalized = path::normalize_path(&metadata.path);
        self.entries.insert(
            normalized.clone(),
            EntrySnapshotMetadata {
                path: path::as_dir_path(&normalized),
                file_type: FileType::Directory,
                permissions: metadata.permissions,
                size: 0,
                created: metadata.created,
                modified: metadata.modified,
                checksum: ZERO_CHECKSUM,
                child_names,
            },
        );
    }

    fn file(&mut self, metadata: Metadata, bytes: Vec<u8>) {
        let normalized = path::normalize_path(&metadata.path);
        let checksum: Checksum = Sha256::digest(&bytes).into();
        let size = bytes.len() as u64;
        let shared = Arc::clone(
            self.buffers
                .entry(checksum)
                .or_insert_with(|| Arc::from(bytes)),
        );
        self.size += size;
        self.contents.insert(
            normalized.clone(),
            SnapshotContent {
                bytes: shared,
                checksum,
            },
        );
        self.entries.insert(
            normalized.clone(),
            EntrySnapshotMetadata {
                path: normalized,
                file_type: FileType::File,
                permissions: metadata.permissions,
                size,
                created: metadata.created,
                modified: metadata.modified,
                checksum,
                child_names: Vec::new(),
            },
        );
    }

    fn finish(self) -> Snapshot {
        Snapshot {
            inner: Arc::new(SnapshotInner {
                entries: self.entries,
                contents: self.contents,
                size: self.size,
                taken_at: SystemTime::now(),
            }),
        }
    }
}
