//! Backend and watcher configuration.
//!
//! Every configuration struct implements [`Default`], deserializes from JSON
//! with missing fields taking their default, and checks its bounds with
//! `validate()`. Backends call `validate()` themselves on construction.
//!
//! ```rust
//! use anyfs_store::config::MetaConfig;
//!
//! let config: MetaConfig = anyfs_store::config::from_json_str(r#"{"max_file_count": 5000}"#).unwrap();
//! assert_eq!(config.max_file_count, 5000);
//! assert_eq!(config.max_parallel_creations, 10);
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::FsError;

/// Smallest byte quota accepted by the in-memory backend (exclusive).
pub const MEMORY_MIN_STORAGE: u64 = 50;

/// Largest byte quota accepted by the in-memory backend.
pub const MEMORY_MAX_STORAGE: u64 = 100_000_000;

/// Default byte quota of the in-memory backend.
pub const MEMORY_DEFAULT_STORAGE: u64 = 10_000_000;

/// Smallest usable space of the metadata-indexed backend.
pub const META_MIN_USABLE_SPACE: u64 = 10_000_000;

/// Default maximum number of files of the metadata-indexed backend.
pub const META_DEFAULT_MAX_FILE_COUNT: u64 = 1000;

/// Default number of creations allowed to run at the same time.
pub const META_DEFAULT_MAX_PARALLEL_CREATIONS: u32 = 10;

/// Largest metadata-indexed filesystem that can be snapshotted.
pub const META_MAX_SNAPSHOTABLE_SIZE: u64 = 100_000_000;

/// Minimum delay between two refreshes of the used-space cache.
pub const META_USED_SPACE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Additions at least this large always refresh the used-space cache.
pub const META_ALWAYS_CHECK_THRESHOLD: u64 = 100_000;

/// Default dispatcher tick.
pub const WATCH_DEFAULT_TICK: Duration = Duration::from_millis(25);

/// Events older than this are pruned from the queues.
pub const EVENT_MIN_RETENTION: Duration = Duration::from_millis(50);

/// Configuration of [`MemoryFs`](crate::MemoryFs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum total size of all file contents, in bytes.
    pub max_storage: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_storage: MEMORY_DEFAULT_STORAGE,
        }
    }
}

impl MemoryConfig {
    /// Configuration with the given byte quota.
    pub fn with_max_storage(max_storage: u64) -> Self {
        Self { max_storage }
    }

    /// Check the quota bounds.
    pub fn validate(&self) -> Result<(), FsError> {
        if self.max_storage <= MEMORY_MIN_STORAGE {
            return Err(FsError::InvalidConfig {
                field: "max_storage",
                reason: format!("must be greater than {MEMORY_MIN_STORAGE}"),
            });
        }
        if self.max_storage > MEMORY_MAX_STORAGE {
            return Err(FsError::InvalidConfig {
                field: "max_storage",
                reason: format!("must not exceed {MEMORY_MAX_STORAGE}"),
            });
        }
        Ok(())
    }
}

/// Configuration of [`MetaFs`](crate::MetaFs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Maximum space used by content blobs, in bytes.
    pub max_usable_space: u64,
    /// Maximum number of regular files.
    pub max_file_count: u64,
    /// Maximum number of creations running at the same time.
    pub max_parallel_creations: u32,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            max_usable_space: META_MIN_USABLE_SPACE,
            max_file_count: META_DEFAULT_MAX_FILE_COUNT,
            max_parallel_creations: META_DEFAULT_MAX_PARALLEL_CREATIONS,
        }
    }
}

impl MetaConfig {
    /// Check the limits.
    pub fn validate(&self) -> Result<(), FsError> {
        if self.max_usable_space < META_MIN_USABLE_SPACE {
            return Err(FsError::InvalidConfig {
                field: "max_usable_space",
                reason: format!("must be at least {META_MIN_USABLE_SPACE}"),
            });
        }
        if self.max_file_count == 0 {
            return Err(FsError::InvalidConfig {
                field: "max_file_count",
                reason: "must be positive".into(),
            });
        }
        if self.max_parallel_creations == 0 {
            return Err(FsError::InvalidConfig {
                field: "max_parallel_creations",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Configuration of the [`WatchRegistry`](crate::WatchRegistry) dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Interval between two dispatch passes.
    #[serde(with = "duration_millis")]
    pub tick: Duration,
    /// Minimum age at which queued events are pruned.
    #[serde(with = "duration_millis")]
    pub retention: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tick: WATCH_DEFAULT_TICK,
            retention: EVENT_MIN_RETENTION.max(WATCH_DEFAULT_TICK * 2),
        }
    }
}

impl WatchConfig {
    /// Check that events survive at least two ticks.
    pub fn validate(&self) -> Result<(), FsError> {
        if self.tick.is_zero() {
            return Err(FsError::InvalidConfig {
                field: "tick",
                reason: "must be positive".into(),
            });
        }
        if self.retention < self.tick * 2 {
            return Err(FsError::InvalidConfig {
                field: "retention",
                reason: "must cover at least two ticks".into(),
            });
        }
        Ok(())
    }
}

/// Deserialize and validate a configuration from JSON.
pub fn from_json_str<T: DeserializeOwned + Validate>(json: &str) -> Result<T, FsError> {
    let config: T = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Bound checking shared by the configuration structs.
pub trait Validate {
    /// Check the configuration.
    fn validate(&self) -> Result<(), FsError>;
}

impl Validate for MemoryConfig {
    fn validate(&self) -> Result<(), FsError> {
        MemoryConfig::validate(self)
    }
}

impl Validate for MetaConfig {
    fn validate(&self) -> Result<(), FsError> {
        MetaConfig::validate(self)
    }
}

impl Validate for WatchConfig {
    fn validate(&self) -> Result<(), FsError> {
        WatchConfig::validate(self)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
