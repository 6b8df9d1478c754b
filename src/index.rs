//! # Hierarchical Index
//!
//! The parent → children structure shared by every backend.
//!
//! ## Overview
//!
//! A backend stores one [`EntryRecord`] per normalized path in some
//! [`RecordStore`]: a `BTreeMap` for [`MemoryFs`](crate::MemoryFs), a
//! key-value transaction for [`MetaFs`](crate::MetaFs). The hierarchy
//! algorithms (`create` with implicit parents, `mkdir -p`, guarded remove,
//! subtree rename, sorted walk) live once in [`Hierarchy`], which has a
//! blanket implementation for every store.
//!
//! Backends only differ in the content strategy `C` carried by file records:
//! inline bytes or a blob reference. Content is never copied by the index;
//! a rename moves the record, and with it the content reference.
//!
//! ## Invariants
//!
//! - `/` always exists and is a directory.
//! - Every other record's basename is listed by exactly one parent record.
//! - Child sets hold unique basenames.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::{FileType, FsError, Permissions, path};

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind<C> {
    /// A directory and the basenames of its children.
    Directory {
        /// Child basenames, unique.
        children: BTreeSet<String>,
    },
    /// A regular file and its content reference.
    File {
        /// Where the bytes live.
        content: C,
    },
}

/// Metadata of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord<C> {
    /// Permission bits.
    pub permissions: Permissions,
    /// Creation time.
    pub created: SystemTime,
    /// Last modification time.
    pub modified: SystemTime,
    /// Directory children or file content.
    pub kind: EntryKind<C>,
}

impl<C> EntryRecord<C> {
    /// A new, empty directory record.
    pub fn directory(permissions: Permissions, now: SystemTime) -> Self {
        Self {
            permissions,
            created: now,
            modified: now,
            kind: EntryKind::Directory {
                children: BTreeSet::new(),
            },
        }
    }

    /// A new file record.
    pub fn file(permissions: Permissions, content: C, now: SystemTime) -> Self {
        Self {
            permissions,
            created: now,
            modified: now,
            kind: EntryKind::File { content },
        }
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { .. })
    }

    /// Type of the entry.
    pub fn file_type(&self) -> FileType {
        match self.kind {
            EntryKind::Directory { .. } => FileType::Directory,
            EntryKind::File { .. } => FileType::File,
        }
    }

    /// Child basenames of a directory.
    pub fn children(&self) -> Option<&BTreeSet<String>> {
        match &self.kind {
            EntryKind::Directory { children } => Some(children),
            EntryKind::File { .. } => None,
        }
    }

    /// Content reference of a file.
    pub fn content(&self) -> Option<&C> {
        match &self.kind {
            EntryKind::File { content } => Some(content),
            EntryKind::Directory { .. } => None,
        }
    }
}

/// Directories synthesized while satisfying a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Created {
    /// Created directory paths, outermost first.
    pub dirs: Vec<String>,
}

impl Created {
    /// Returns `true` if `path` was among the created directories.
    pub fn includes(&self, path: &str) -> bool {
        self.dirs.iter().any(|dir| dir == path)
    }
}

/// Storage of records keyed by normalized path.
///
/// `link_child` and `unlink_child` have read-modify-write defaults; stores
/// that can mutate in place override them.
pub trait RecordStore {
    /// Content strategy of file records.
    type Content: Clone;

    /// Fetch a record.
    fn get(&self, path: &str) -> Result<Option<EntryRecord<Self::Content>>, FsError>;

    /// Insert or replace a record.
    fn put(&mut self, path: &str, record: EntryRecord<Self::Content>) -> Result<(), FsError>;

    /// Delete a record. Deleting a missing record is not an error.
    fn delete(&mut self, path: &str) -> Result<(), FsError>;

    /// Paths strictly below `path`, sorted.
    fn descendants(&self, path: &str) -> Result<Vec<String>, FsError>;

    /// Add `name` to the children of `dir` and bump its modification time.
    fn link_child(&mut self, dir: &str, name: &str, now: SystemTime) -> Result<(), FsError> {
        let mut record = self.get(dir)?.ok_or_else(|| FsError::not_found(dir))?;
        match &mut record.kind {
            EntryKind::Directory { children } => {
                children.insert(name.to_string());
            }
            EntryKind::File { .. } => {
                return Err(FsError::NotADirectory {
                    path: PathBuf::from(dir),
                });
            }
        }
        record.modified = now;
        self.put(dir, record)
    }

    /// Remove `name` from the children of `dir` and bump its modification
    /// time. Returns `false` if the name was not listed.
    fn unlink_child(&mut self, dir: &str, name: &str, now: SystemTime) -> Result<bool, FsError> {
        let Some(mut record) = self.get(dir)? else {
            return Ok(false);
        };
        let removed = match &mut record.kind {
            EntryKind::Directory { children } => children.remove(name),
            EntryKind::File { .. } => false,
        };
        if removed {
            record.modified = now;
            self.put(dir, record)?;
        }
        Ok(removed)
    }
}

impl<C: Clone> RecordStore for BTreeMap<String, EntryRecord<C>> {
    type Content = C;

    fn get(&self, path: &str) -> Result<Option<EntryRecord<C>>, FsError> {
        Ok(BTreeMap::get(self, path).cloned())
    }

    fn put(&mut self, path: &str, record: EntryRecord<C>) -> Result<(), FsError> {
        self.insert(path.to_string(), record);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), FsError> {
        self.remove(path);
        Ok(())
    }

    fn descendants(&self, path: &str) -> Result<Vec<String>, FsError> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        Ok(self
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter(|key| key.as_str() != path)
            .cloned()
            .collect())
    }

    fn link_child(&mut self, dir: &str, name: &str, now: SystemTime) -> Result<(), FsError> {
        let record = self.get_mut(dir).ok_or_else(|| FsError::not_found(dir))?;
        match &mut record.kind {
            EntryKind::Directory { children } => {
                children.insert(name.to_string());
                record.modified = now;
                Ok(())
            }
            EntryKind::File { .. } => Err(FsError::NotADirectory {
                path: PathBuf::from(dir),
            }),
        }
    }

    fn unlink_child(&mut self, dir: &str, name: &str, now: SystemTime) -> Result<bool, FsError> {
        let Some(record) = self.get_mut(dir) else {
            return Ok(false);
        };
        let removed = match &mut record.kind {
            EntryKind::Directory { children } => children.remove(name),
            EntryKind::File { .. } => false,
        };
        if removed {
            record.modified = now;
        }
        Ok(removed)
    }
}

/// Hierarchy algorithms over any [`RecordStore`].
///
/// All paths must already be normalized.
pub trait Hierarchy: RecordStore {
    /// Create the root directory if it is missing. Returns `true` if created.
    fn ensure_root(&mut self, now: SystemTime) -> Result<bool, FsError> {
        if self.get("/")?.is_some() {
            return Ok(false);
        }
        self.put("/", EntryRecord::directory(Permissions::private_dir(), now))?;
        Ok(true)
    }

    /// Insert a new record at `path`, synthesizing missing parents.
    ///
    /// # Errors
    ///
    /// - [`FsError::AlreadyExists`] if a record exists at `path`
    /// - [`FsError::NotADirectory`] if an ancestor is a file
    fn create_entry(
        &mut self,
        path: &str,
        record: EntryRecord<Self::Content>,
        now: SystemTime,
    ) -> Result<Created, FsError> {
        if path == "/" || self.get(path)?.is_some() {
            return Err(FsError::exists(path, "create"));
        }
        let parent = path::parent(path);
        let created = ensure_parent_dirs(self, parent, now)?;
        self.link_child(parent, path::basename(path), now)?;
        self.put(path, record)?;
        Ok(created)
    }

    /// Create `path` and every missing ancestor as directories.
    ///
    /// An existing directory is not an error.
    ///
    /// # Errors
    ///
    /// - [`FsError::AlreadyExists`] if `path` is an existing file
    /// - [`FsError::NotADirectory`] if an ancestor is a file
    fn mkdir_all(
        &mut self,
        path: &str,
        permissions: Permissions,
        now: SystemTime,
    ) -> Result<Created, FsError> {
        let mut created = Created::default();
        if path == "/" {
            return Ok(created);
        }

        let mut missing = Vec::new();
        let mut current = path;
        loop {
            match self.get(current)? {
                Some(record) if record.is_dir() => break,
                Some(_) if current == path => return Err(FsError::exists(path, "mkdir_all")),
                Some(_) => {
                    return Err(FsError::NotADirectory {
                        path: PathBuf::from(current),
                    });
                }
                None => {
                    missing.push(current.to_string());
                    current = path::parent(current);
                }
            }
        }

        for dir in missing.into_iter().rev() {
            self.link_child(path::parent(&dir), path::basename(&dir), now)?;
            self.put(&dir, EntryRecord::directory(permissions, now))?;
            created.dirs.push(dir);
        }
        Ok(created)
    }

    /// Remove the record at `path` and unlink it from its parent.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if there is no record
    /// - [`FsError::DirectoryNotEmpty`] for a directory with children
    /// - [`FsError::NotSupported`] for `/`
    fn remove_entry(
        &mut self,
        path: &str,
        now: SystemTime,
    ) -> Result<EntryRecord<Self::Content>, FsError> {
        if path == "/" {
            return Err(FsError::NotSupported {
                operation: "remove root directory",
            });
        }
        let record = self.get(path)?.ok_or_else(|| FsError::not_found(path))?;
        if record.children().is_some_and(|children| !children.is_empty()) {
            return Err(FsError::DirectoryNotEmpty {
                path: PathBuf::from(path),
            });
        }
        self.unlink_child(path::parent(path), path::basename(path), now)?;
        self.delete(path)?;
        Ok(record)
    }

    /// Move the subtree at `from` to `to`.
    ///
    /// Returns every `(old, new)` pair, `from` itself first.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if `from` does not exist
    /// - [`FsError::AlreadyExists`] if `to` exists
    /// - [`FsError::InvalidPath`] if `to` is `from` itself, a descendant of
    ///   it, or either is `/`
    fn rename_entry(
        &mut self,
        from: &str,
        to: &str,
        now: SystemTime,
    ) -> Result<Vec<(String, String)>, FsError> {
        if from == "/" || to == "/" {
            return Err(FsError::InvalidPath {
                path: PathBuf::from("/"),
                reason: "the root directory cannot be renamed",
            });
        }
        if self.get(from)?.is_none() {
            return Err(FsError::not_found(from));
        }
        if path::is_within(to, from) {
            return Err(FsError::InvalidPath {
                path: PathBuf::from(to),
                reason: "destination is inside the source",
            });
        }
        if self.get(to)?.is_some() {
            return Err(FsError::exists(to, "rename"));
        }

        let mut moves = vec![(from.to_string(), to.to_string())];
        for old in self.descendants(from)? {
            let new = path::relocate(&old, from, to);
            moves.push((old, new));
        }

        // Nothing may change before the destination parent is known good.
        let to_parent = path::parent(to);
        ensure_parent_dirs(self, to_parent, now)?;
        self.unlink_child(path::parent(from), path::basename(from), now)?;
        self.link_child(to_parent, path::basename(to), now)?;

        for (old, new) in &moves {
            let record = self.get(old)?.ok_or_else(|| FsError::CorruptedData {
                path: PathBuf::from(old),
                details: "record vanished during rename".into(),
            })?;
            self.delete(old)?;
            self.put(new, record)?;
        }
        Ok(moves)
    }

    /// Sorted child basenames of a directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if there is no record
    /// - [`FsError::NotADirectory`] for a file
    fn list_children(&self, path: &str) -> Result<Vec<String>, FsError> {
        let record = self.get(path)?.ok_or_else(|| FsError::not_found(path))?;
        match record.kind {
            EntryKind::Directory { children } => Ok(children.into_iter().collect()),
            EntryKind::File { .. } => Err(FsError::NotADirectory {
                path: PathBuf::from(path),
            }),
        }
    }

    /// Visit every record depth-first from `/`, children in sorted order.
    ///
    /// # Errors
    ///
    /// Stops at the first error returned by `visit`. A listed child without
    /// a record is reported as [`FsError::CorruptedData`].
    fn walk(
        &self,
        visit: &mut dyn FnMut(&str, &EntryRecord<Self::Content>) -> Result<(), FsError>,
    ) -> Result<(), FsError> {
        let root = self.get("/")?.ok_or_else(|| FsError::not_found("/"))?;
        walk_from(self, "/", &root, visit)
    }
}

impl<S: RecordStore + ?Sized> Hierarchy for S {}

fn ensure_parent_dirs<S: RecordStore + ?Sized>(
    store: &mut S,
    dir: &str,
    now: SystemTime,
) -> Result<Created, FsError> {
    match store.get(dir)? {
        Some(record) if record.is_dir() => Ok(Created::default()),
        Some(_) => Err(FsError::NotADirectory {
            path: PathBuf::from(dir),
        }),
        None => store.mkdir_all(dir, Permissions::private_dir(), now),
    }
}

fn walk_from<S: RecordStore + ?Sized>(
    store: &S,
    path: &str,
    record: &EntryRecord<S::Content>,
    visit: &mut dyn FnMut(&str, &EntryRecord<S::Content>) -> Result<(), FsError>,
) -> Result<(), FsError> {
    visit(path, record)?;
    if let Some(children) = record.children() {
        for name in children {
            let child_path = path::child(path, name);
            let child = store.get(&child_path)?.ok_or_else(|| FsError::CorruptedData {
                path: PathBuf::from(&child_path),
                details: format!("listed by {path} but has no record"),
            })?;
            walk_from(store, &child_path, &child, visit)?;
        }
    }
    Ok(())
}
