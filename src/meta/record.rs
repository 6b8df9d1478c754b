//! Metadata records of the metadata-indexed backend and their JSON form.
//!
//! Each entry is one key-value pair:
//!
//! ```text
//! /files            {"file-mode":16832,"creation-time":[..],"modification-time":[..],"children":["docs"]}
//! /files/docs/a.txt {"file-mode":33188,"creation-time":[..],"modification-time":[..],"underlying-file":"0190..."}
//! ```
//!
//! The mode carries the Unix type bits; times are `[seconds, nanoseconds]`
//! since the Unix epoch.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::index::{EntryKind, EntryRecord, RecordStore};
use crate::meta::kv::KvTransaction;
use crate::{FileType, FsError};

/// Key of the root record; every other key is this prefix plus the path.
pub const FILES_KEY: &str = "/files";

/// Key of the record of a normalized path.
pub fn record_key(path: &str) -> String {
    if path == "/" {
        FILES_KEY.to_string()
    } else {
        format!("{FILES_KEY}{path}")
    }
}

/// Name of the blob holding a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobName(String);

impl BlobName {
    /// A fresh, time-ordered unique name.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlobName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for BlobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Stamp(u64, u32);

impl From<SystemTime> for Stamp {
    fn from(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self(since.as_secs(), since.subsec_nanos())
    }
}

impl From<Stamp> for SystemTime {
    fn from(stamp: Stamp) -> Self {
        UNIX_EPOCH + Duration::new(stamp.0, stamp.1)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecord {
    #[serde(rename = "file-mode", default, skip_serializing_if = "Option::is_none")]
    file_mode: Option<u32>,
    #[serde(rename = "creation-time", default, skip_serializing_if = "Option::is_none")]
    creation_time: Option<Stamp>,
    #[serde(rename = "modification-time", default, skip_serializing_if = "Option::is_none")]
    modification_time: Option<Stamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<String>>,
    #[serde(rename = "underlying-file", default, skip_serializing_if = "Option::is_none")]
    underlying_file: Option<String>,
}

/// JSON form of a record.
pub fn encode(record: &EntryRecord<BlobName>) -> Result<String, FsError> {
    let (children, underlying_file) = match &record.kind {
        EntryKind::Directory { children } => (Some(children.iter().cloned().collect()), None),
        EntryKind::File { content } => (None, Some(content.as_str().to_string())),
    };
    let raw = RawRecord {
        file_mode: Some(record.file_type().with_permissions(record.permissions)),
        creation_time: Some(record.created.into()),
        modification_time: Some(record.modified.into()),
        children,
        underlying_file,
    };
    serde_json::to_string(&raw).map_err(|err| FsError::Serialization(err.to_string()))
}

/// Parse the record of `path`.
///
/// # Errors
///
/// - [`FsError::Deserialization`] if `json` is not a record object
/// - [`FsError::CorruptedData`] if a required property is missing or the
///   mode is not a file or directory mode
pub fn decode(path: &str, json: &str) -> Result<EntryRecord<BlobName>, FsError> {
    let raw: RawRecord = serde_json::from_str(json)?;
    let corrupted = |details: &str| FsError::CorruptedData {
        path: PathBuf::from(path),
        details: details.to_string(),
    };

    let mode = raw.file_mode.ok_or_else(|| corrupted("missing property file-mode"))?;
    let created = raw
        .creation_time
        .ok_or_else(|| corrupted("missing property creation-time"))?;
    let modified = raw
        .modification_time
        .ok_or_else(|| corrupted("missing property modification-time"))?;
    let (file_type, permissions) =
        FileType::split_mode(mode).ok_or_else(|| corrupted("unsupported file type in file-mode"))?;

    let kind = match file_type {
        FileType::Directory => EntryKind::Directory {
            children: raw.children.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
        },
        FileType::File => EntryKind::File {
            content: raw
                .underlying_file
                .map(BlobName::from)
                .ok_or_else(|| corrupted("missing property underlying-file"))?,
        },
    };
    Ok(EntryRecord {
        permissions,
        created: created.into(),
        modified: modified.into(),
        kind,
    })
}

/// Records seen through one KV transaction.
pub struct TxStore<'a> {
    tx: Box<dyn KvTransaction + 'a>,
}

impl<'a> TxStore<'a> {
    /// Wrap a transaction.
    pub fn new(tx: Box<dyn KvTransaction + 'a>) -> Self {
        Self { tx }
    }

    /// Commit the underlying transaction.
    pub fn commit(self) -> Result<(), FsError> {
        self.tx.commit()
    }

    /// Roll the underlying transaction back.
    pub fn rollback(self) {
        self.tx.rollback();
    }
}

impl RecordStore for TxStore<'_> {
    type Content = BlobName;

    fn get(&self, path: &str) -> Result<Option<EntryRecord<BlobName>>, FsError> {
        self.tx
            .get(&record_key(path))?
            .map(|json| decode(path, &json))
            .transpose()
    }

    fn put(&mut self, path: &str, record: EntryRecord<BlobName>) -> Result<(), FsError> {
        self.tx.set(&record_key(path), &encode(&record)?)
    }

    fn delete(&mut self, path: &str) -> Result<(), FsError> {
        self.tx.delete(&record_key(path)).map(|_| ())
    }

    fn descendants(&self, path: &str) -> Result<Vec<String>, FsError> {
        let prefix = format!("{}/", record_key(path));
        let mut paths = Vec::new();
        self.tx.ascend(&prefix, &mut |key, _| {
            paths.push(key[FILES_KEY.len()..].to_string());
            true
        })?;
        Ok(paths)
    }
}
