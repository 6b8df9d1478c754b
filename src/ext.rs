//! Extension methods for filesystem backends.
//!
//! Provides whole-file convenience methods on top of [`Fs`]. Every
//! backend gets these for free through a blanket implementation.

use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use crate::{DirEntry, FileHandle, FileType, Fs, FsError, OpenFlags, Permissions};

/// Extension methods for [`Fs`] backends.
///
/// # Example
///
/// ```rust
/// use anyfs_store::{FsExt, MemoryConfig, MemoryFs};
/// use std::path::Path;
///
/// let fs = MemoryFs::new(MemoryConfig::default()).unwrap();
/// fs.write_file(Path::new("/notes/today.txt"), b"buy milk").unwrap();
/// assert!(fs.is_file(Path::new("/notes/today.txt")).unwrap());
/// assert!(fs.is_dir(Path::new("/notes")).unwrap());
/// assert_eq!(fs.read_file(Path::new("/notes/today.txt")).unwrap(), b"buy milk");
/// ```
pub trait FsExt: Fs {
    /// Check if a path exists.
    ///
    /// Returns `Ok(false)` instead of [`FsError::NotFound`].
    fn exists(&self, path: &Path) -> Result<bool, FsError> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check if the path points to a regular file.
    ///
    /// Returns `Ok(false)` if the path doesn't exist (not an error).
    fn is_file(&self, path: &Path) -> Result<bool, FsError> {
        match self.stat(path) {
            Ok(m) => Ok(m.is_file()),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check if the path points to a directory.
    ///
    /// Returns `Ok(false)` if the path doesn't exist (not an error).
    ///
    /// # Example
    ///
    /// ```rust
    /// use anyfs_store::{Fs, FsExt, FsError, Permissions};
    /// use std::path::Path;
    ///
    /// fn ensure_dir<B: Fs>(fs: &B, path: &Path) -> Result<(), FsError> {
    ///     if !fs.is_dir(path)? {
    ///         fs.mkdir_all(path, Permissions::default_dir())?;
    ///     }
    ///     Ok(())
    /// }
    /// ```
    fn is_dir(&self, path: &Path) -> Result<bool, FsError> {
        match self.stat(path) {
            Ok(m) => Ok(m.is_dir()),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a whole file.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        let mut file = self.open(path)?;
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        file.close()?;
        Ok(data)
    }

    /// Read a whole file as UTF-8.
    ///
    /// # Errors
    ///
    /// - [`FsError::CorruptedData`] if the content is not valid UTF-8
    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        String::from_utf8(self.read_file(path)?).map_err(|e| FsError::CorruptedData {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// Create or replace a file with `data`.
    ///
    /// Missing parent directories are created.
    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        let file = self.open_file(path, OpenFlags::CREATE, Permissions::default_file())?;
        write_all(file, data)
    }

    /// Append `data` to a file, creating it if missing.
    fn append_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        let file = self.open_file(path, OpenFlags::APPEND, Permissions::default_file())?;
        write_all(file, data)
    }

    /// Visit every entry below `dir`, depth first, parents before children.
    ///
    /// Siblings are visited in name order. `dir` itself is not visited.
    fn walk(&self, dir: &Path, visit: &mut dyn FnMut(&DirEntry)) -> Result<(), FsError> {
        for entry in self.read_dir(dir)?.collect_all()? {
            visit(&entry);
            if entry.file_type == FileType::Directory {
                self.walk(&entry.path, visit)?;
            }
        }
        Ok(())
    }

    /// Read a file and deserialize it as JSON.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the file doesn't exist
    /// - [`FsError::Deserialization`] if JSON parsing failed
    ///
    /// # Example
    ///
    /// ```rust
    /// use anyfs_store::{Fs, FsError, FsExt};
    /// use std::path::Path;
    ///
    /// fn load_config<B: Fs>(fs: &B) -> Result<serde_json::Value, FsError> {
    ///     fs.read_json(Path::new("/config.json"))
    /// }
    /// ```
    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, FsError>
    where
        Self: Sized,
    {
        let data = self.read_file(path)?;
        serde_json::from_slice(&data).map_err(|e| FsError::Deserialization(e.to_string()))
    }

    /// Serialize a value and write it as pretty-printed JSON.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), FsError>
    where
        Self: Sized,
    {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| FsError::Serialization(e.to_string()))?;
        self.write_file(path, &json)
    }
}

// Blanket implementation - any Fs backend gets FsExt for free
impl<B: Fs + ?Sized> FsExt for B {}

fn write_all(mut file: Box<dyn FileHandle>, mut data: &[u8]) -> Result<(), FsError> {
    while !data.is_empty() {
        let n = file.write(data)?;
        if n == 0 {
            return Err(FsError::Io {
                operation: "write",
                path: file.path().into(),
                source: std::io::ErrorKind::WriteZero.into(),
            });
        }
        data = &data[n..];
    }
    file.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryConfig, MemoryFs};

    fn fs() -> MemoryFs {
        MemoryFs::new(MemoryConfig::default()).unwrap()
    }

    #[test]
    fn missing_paths_are_neither_files_nor_dirs() {
        let fs = fs();
        assert!(!fs.exists(Path::new("/missing")).unwrap());
        assert!(!fs.is_file(Path::new("/missing")).unwrap());
        assert!(!fs.is_dir(Path::new("/missing")).unwrap());
    }

    #[test]
    fn write_then_read_creates_parents() {
        let fs = fs();
        fs.write_file(Path::new("/a/b/c.txt"), b"hello").unwrap();
        assert!(fs.is_dir(Path::new("/a/b")).unwrap());
        assert_eq!(fs.read_file(Path::new("/a/b/c.txt")).unwrap(), b"hello");
    }

    #[test]
    fn write_replaces_and_append_extends() {
        let fs = fs();
        let path = Path::new("/log");
        fs.write_file(path, b"first").unwrap();
        fs.write_file(path, b"second").unwrap();
        fs.append_file(path, b"+more").unwrap();
        assert_eq!(fs.read_to_string(path).unwrap(), "second+more");
    }

    #[test]
    fn read_to_string_rejects_invalid_utf8() {
        let fs = fs();
        fs.write_file(Path::new("/bin"), &[0xff, 0xfe]).unwrap();
        assert!(matches!(
            fs.read_to_string(Path::new("/bin")),
            Err(FsError::CorruptedData { .. })
        ));
    }

    #[test]
    fn walk_visits_parents_first_in_name_order() {
        let fs = fs();
        fs.write_file(Path::new("/b/2"), b"").unwrap();
        fs.write_file(Path::new("/b/1"), b"").unwrap();
        fs.write_file(Path::new("/a"), b"").unwrap();

        let mut seen = Vec::new();
        fs.walk(Path::new("/"), &mut |entry| {
            seen.push(entry.path.to_string_lossy().into_owned())
        })
        .unwrap();
        assert_eq!(seen, vec!["/a", "/b", "/b/1", "/b/2"]);
    }

    #[test]
    fn json_round_trips_through_files() {
        let fs = fs();
        let value = serde_json::json!({ "name": "store", "size": 3 });
        fs.write_json(Path::new("/config.json"), &value).unwrap();
        let back: serde_json::Value = fs.read_json(Path::new("/config.json")).unwrap();
        assert_eq!(back, value);
    }
}
