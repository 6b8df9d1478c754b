//! Content blobs of the metadata-indexed backend.
//!
//! A blob is a flat, named byte container; the metadata records map paths
//! to blob names. Two stores are bundled:
//!
//! | Store | Blobs live in |
//! |-------|---------------|
//! | [`DirBlobStore`] | one OS file per blob inside a directory |
//! | [`MemoryBlobStore`] | process memory |

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::FsError;

/// Size and modification time of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Blob name.
    pub name: String,
    /// Length in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

/// An open blob. Every handle on the same blob sees the same bytes.
pub trait Blob: Send + Sync + std::fmt::Debug {
    /// Copy bytes at `offset` into `buf`. Returns 0 at or past the end.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError>;

    /// Write `data` at `offset`, zero-filling any gap.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError>;

    /// Current length.
    fn len(&self) -> Result<u64, FsError>;

    /// Returns `true` if the blob is empty.
    fn is_empty(&self) -> Result<bool, FsError> {
        Ok(self.len()? == 0)
    }

    /// Resize to `size` bytes.
    fn set_len(&self, size: u64) -> Result<(), FsError>;

    /// Flush to durable storage.
    fn sync(&self) -> Result<(), FsError>;
}

/// A flat namespace of blobs.
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    /// Create an empty blob, replacing any blob of that name.
    fn create(&self, name: &str) -> Result<Arc<dyn Blob>, FsError>;

    /// Open an existing blob.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if there is no such blob
    fn open(&self, name: &str) -> Result<Arc<dyn Blob>, FsError>;

    /// Size and modification time of a blob.
    fn stat(&self, name: &str) -> Result<BlobInfo, FsError>;

    /// Delete a blob.
    fn remove(&self, name: &str) -> Result<(), FsError>;

    /// Every stored blob.
    fn list(&self) -> Result<Vec<BlobInfo>, FsError>;
}

/// Read a whole blob.
pub fn read_all(blob: &dyn Blob) -> Result<Vec<u8>, FsError> {
    let mut bytes = vec![0; blob.len()? as usize];
    let mut filled = 0;
    while filled < bytes.len() {
        let n = blob.read_at(&mut bytes[filled..], filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    bytes.truncate(filled);
    Ok(bytes)
}

/// Blobs stored as files of one directory.
///
/// The directory should hold nothing else: [`BlobStore::list`] reports
/// every regular file in it.
#[derive(Debug)]
pub struct DirBlobStore {
    dir: PathBuf,
}

impl DirBlobStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FsError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|err| FsError::io("create blob directory", &dir, err))?;
        Ok(Self { dir })
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn locate(&self, name: &str) -> Result<PathBuf, FsError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(FsError::InvalidPath {
                path: PathBuf::from(name),
                reason: "blob names are single path elements",
            });
        }
        Ok(self.dir.join(name))
    }
}

fn options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn map_missing(operation: &'static str, path: &Path, err: io::Error) -> FsError {
    if err.kind() == io::ErrorKind::NotFound {
        FsError::not_found(path)
    } else {
        FsError::io(operation, path, err)
    }
}

fn info(name: String, metadata: &fs::Metadata) -> BlobInfo {
    BlobInfo {
        name,
        size: metadata.len(),
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

impl BlobStore for DirBlobStore {
    fn create(&self, name: &str) -> Result<Arc<dyn Blob>, FsError> {
        let path = self.locate(name)?;
        let file = options()
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| FsError::io("create blob", &path, err))?;
        Ok(Arc::new(FileBlob::new(path, file)))
    }

    fn open(&self, name: &str) -> Result<Arc<dyn Blob>, FsError> {
        let path = self.locate(name)?;
        let file = options()
            .open(&path)
            .map_err(|err| map_missing("open blob", &path, err))?;
        Ok(Arc::new(FileBlob::new(path, file)))
    }

    fn stat(&self, name: &str) -> Result<BlobInfo, FsError> {
        let path = self.locate(name)?;
        let metadata = fs::metadata(&path).map_err(|err| map_missing("stat blob", &path, err))?;
        Ok(info(name.to_string(), &metadata))
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        let path = self.locate(name)?;
        fs::remove_file(&path).map_err(|err| map_missing("remove blob", &path, err))
    }

    fn list(&self) -> Result<Vec<BlobInfo>, FsError> {
        let entries =
            fs::read_dir(&self.dir).map_err(|err| FsError::io("list blobs", &self.dir, err))?;
        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FsError::io("list blobs", &self.dir, err))?;
            let metadata = entry
                .metadata()
                .map_err(|err| FsError::io("stat blob", entry.path(), err))?;
            if metadata.is_file() {
                blobs.push(info(entry.file_name().to_string_lossy().into_owned(), &metadata));
            }
        }
        Ok(blobs)
    }
}

/// A blob backed by an OS file.
#[derive(Debug)]
struct FileBlob {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileBlob {
    fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    fn io(&self, operation: &'static str, err: io::Error) -> FsError {
        FsError::io(operation, &self.path, err)
    }
}

impl Blob for FileBlob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| self.io("read blob", err))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(self.io("read blob", err)),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| self.io("write blob", err))?;
        file.write_all(data).map_err(|err| self.io("write blob", err))?;
        Ok(data.len())
    }

    fn len(&self) -> Result<u64, FsError> {
        let file = self.file.lock();
        file.metadata()
            .map(|metadata| metadata.len())
            .map_err(|err| self.io("stat blob", err))
    }

    fn set_len(&self, size: u64) -> Result<(), FsError> {
        self.file
            .lock()
            .set_len(size)
            .map_err(|err| self.io("truncate blob", err))
    }

    fn sync(&self) -> Result<(), FsError> {
        self.file
            .lock()
            .sync_all()
            .map_err(|err| self.io("sync blob", err))
    }
}

/// Blobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Arc<MemoryBlob>>>,
}

impl MemoryBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn create(&self, name: &str) -> Result<Arc<dyn Blob>, FsError> {
        let blob = Arc::new(MemoryBlob::default());
        self.blobs.write().insert(name.to_string(), Arc::clone(&blob));
        Ok(blob)
    }

    fn open(&self, name: &str) -> Result<Arc<dyn Blob>, FsError> {
        self.blobs
            .read()
            .get(name)
            .map(|blob| Arc::clone(blob) as Arc<dyn Blob>)
            .ok_or_else(|| FsError::not_found(name))
    }

    fn stat(&self, name: &str) -> Result<BlobInfo, FsError> {
        let blobs = self.blobs.read();
        let blob = blobs.get(name).ok_or_else(|| FsError::not_found(name))?;
        Ok(blob.info(name))
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        self.blobs
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FsError::not_found(name))
    }

    fn list(&self) -> Result<Vec<BlobInfo>, FsError> {
        Ok(self
            .blobs
            .read()
            .iter()
            .map(|(name, blob)| blob.info(name))
            .collect())
    }
}

#[derive(Debug)]
struct MemoryBlob {
    state: RwLock<(Vec<u8>, SystemTime)>,
}

impl Default for MemoryBlob {
    fn default() -> Self {
        Self {
            state: RwLock::new((Vec::new(), SystemTime::now())),
        }
    }
}

impl MemoryBlob {
    fn info(&self, name: &str) -> BlobInfo {
        let state = self.state.read();
        BlobInfo {
            name: name.to_string(),
            size: state.0.len() as u64,
            modified: state.1,
        }
    }
}

impl Blob for MemoryBlob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let state = self.state.read();
        let bytes = &state.0;
        if offset >= bytes.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, FsError> {
        let mut state = self.state.write();
        let start = offset as usize;
        let end = start + data.len();
        if end > state.0.len() {
            state.0.resize(end, 0);
        }
        state.0[start..end].copy_from_slice(data);
        state.1 = SystemTime::now();
        Ok(data.len())
    }

    fn len(&self) -> Result<u64, FsError> {
        Ok(self.state.read().0.len() as u64)
    }

    fn set_len(&self, size: u64) -> Result<(), FsError> {
        let mut state = self.state.write();
        state.0.resize(size as usize, 0);
        state.1 = SystemTime::now();
        Ok(())
    }

    fn sync(&self) -> Result<(), FsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn BlobStore) {
        let blob = store.create("one").unwrap();
        blob.write_at(b"world", 6).unwrap();
        blob.write_at(b"hello", 0).unwrap();
        assert_eq!(read_all(&*blob).unwrap(), b"hello\0world");
        assert_eq!(store.stat("one").unwrap().size, 11);

        let again = store.open("one").unwrap();
        again.set_len(5).unwrap();
        assert_eq!(read_all(&*blob).unwrap(), b"hello");

        let mut buf = [0u8; 4];
        assert_eq!(blob.read_at(&mut buf, 5).unwrap(), 0);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["one"]);

        store.remove("one").unwrap();
        assert!(matches!(store.open("one"), Err(FsError::NotFound { .. })));
        assert!(matches!(store.remove("one"), Err(FsError::NotFound { .. })));
    }

    #[test]
    fn memory_store_behaves() {
        exercise(&MemoryBlobStore::new());
    }

    #[test]
    fn dir_store_behaves() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&DirBlobStore::open(dir.path().join("blobs")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn dir_blobs_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::open(dir.path()).unwrap();
        store.create("secret").unwrap();
        let mode = fs::metadata(dir.path().join("secret")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn dir_store_rejects_nested_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.create("../escape"),
            Err(FsError::InvalidPath { .. })
        ));
    }
}
