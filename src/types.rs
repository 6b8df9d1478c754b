//! Core types shared by every AnyFS storage backend.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Unix file-type bit for directories (`S_IFDIR`).
pub const MODE_DIR: u32 = 0o040000;

/// Unix file-type bit for regular files (`S_IFREG`).
pub const MODE_FILE: u32 = 0o100000;

const MODE_TYPE_MASK: u32 = 0o170000;

/// Whether an entry holds bytes or children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Combine the type bit with permission bits into a full Unix mode.
    #[inline]
    pub const fn with_permissions(self, permissions: Permissions) -> u32 {
        let kind = match self {
            FileType::File => MODE_FILE,
            FileType::Directory => MODE_DIR,
        };
        kind | permissions.mode()
    }

    /// Split a full Unix mode into type and permissions.
    ///
    /// Returns `None` for modes that are neither a regular file nor a directory.
    pub const fn split_mode(mode: u32) -> Option<(FileType, Permissions)> {
        let permissions = Permissions::from_mode(mode);
        match mode & MODE_TYPE_MASK {
            MODE_DIR => Some((FileType::Directory, permissions)),
            MODE_FILE | 0 => Some((FileType::File, permissions)),
            _ => None,
        }
    }
}

/// What `stat` reports about an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Base name (`/` for the root directory).
    pub name: String,
    /// Normalized absolute path.
    pub path: PathBuf,
    /// Type of the entry.
    pub file_type: FileType,
    /// Size in bytes, always 0 for directories.
    pub size: u64,
    /// Permission bits, without the type bit.
    pub permissions: Permissions,
    /// Set once when the entry is created.
    #[serde(with = "system_time_serde")]
    pub created: SystemTime,
    /// Time of the last content write, or the creation time.
    #[serde(with = "system_time_serde")]
    pub modified: SystemTime,
}

impl Metadata {
    /// `true` for entries holding content.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    /// `true` for entries holding children.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Full Unix mode, type bit included.
    #[inline]
    pub fn mode(&self) -> u32 {
        self.file_type.with_permissions(self.permissions)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: PathBuf::new(),
            file_type: FileType::File,
            size: 0,
            permissions: Permissions::default_file(),
            created: SystemTime::UNIX_EPOCH,
            modified: SystemTime::UNIX_EPOCH,
        }
    }
}

/// One child yielded by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Last path segment.
    pub name: String,
    /// Normalized absolute path of the child.
    pub path: PathBuf,
    /// Type of the entry.
    pub file_type: FileType,
    /// Content length, 0 for directories.
    pub size: u64,
    /// Same as [`Metadata::modified`].
    #[serde(with = "system_time_serde")]
    pub modified: SystemTime,
}

impl From<Metadata> for DirEntry {
    fn from(metadata: Metadata) -> Self {
        Self {
            name: metadata.name,
            path: metadata.path,
            file_type: metadata.file_type,
            size: metadata.size,
            modified: metadata.modified,
        }
    }
}

/// The low twelve bits of a Unix mode. The type bit lives in [`FileType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(u32);

impl Permissions {
    /// Keep only the permission bits of `mode`.
    #[inline]
    pub const fn from_mode(mode: u32) -> Self {
        Self(mode & 0o7777)
    }

    /// Permission bits as stored.
    #[inline]
    pub const fn mode(&self) -> u32 {
        self.0
    }

    /// No write bit is set for anyone.
    #[inline]
    pub const fn readonly(&self) -> bool {
        (self.0 & 0o222) == 0
    }

    /// `0o644`, used when a caller has no preference for a file.
    #[inline]
    pub const fn default_file() -> Self {
        Self(0o644)
    }

    /// `0o755`, used by explicit `mkdir_all` calls.
    #[inline]
    pub const fn default_dir() -> Self {
        Self(0o755)
    }

    /// Permissions of the root directory and of directories created
    /// implicitly as parents (0o700 = rwx------).
    #[inline]
    pub const fn private_dir() -> Self {
        Self(0o700)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::default_file()
    }
}

/// Opaque identifier of an open file handle.
///
/// The low 32 bits are the slot index in the backend's handle arena, the high
/// 32 bits the slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl Handle {
    pub(crate) const fn from_parts(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub(crate) const fn index(self) -> u32 {
        self.0 as u32
    }

    pub(crate) const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// How `open_file` treats an existing or missing file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file when it is missing.
    pub create: bool,
    /// Drop existing content at open.
    pub truncate: bool,
    /// Start the cursor at the current end.
    pub append: bool,
    /// Fail if the file already exists (with `create`).
    pub exclusive: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
        truncate: false,
        append: false,
        exclusive: false,
    };

    /// Write-only, replacing any previous content.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: true,
        append: false,
        exclusive: false,
    };

    /// Both directions on an existing file.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        truncate: false,
        append: false,
        exclusive: false,
    };

    /// Write-only, cursor at the end, created if missing.
    pub const APPEND: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: false,
        append: true,
        exclusive: false,
    };

    /// Read-write with create and truncate, used by `create`.
    pub const CREATE: Self = Self {
        read: true,
        write: true,
        create: true,
        truncate: true,
        append: false,
        exclusive: false,
    };

    /// Read-write, the file must not exist yet.
    pub const CREATE_NEW: Self = Self {
        read: true,
        write: true,
        create: true,
        truncate: false,
        append: false,
        exclusive: true,
    };

    /// Returns `true` if the handle may modify content.
    #[inline]
    pub const fn writes(&self) -> bool {
        self.write || self.append
    }
}

/// `SystemTime` as `[seconds, nanoseconds]` after the epoch.
pub(crate) mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        (duration.as_secs(), duration.subsec_nanos()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (secs, nanos): (u64, u32) = Deserialize::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
}
