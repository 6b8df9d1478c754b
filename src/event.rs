//! Change events and the per-backend event queue.
//!
//! Every structural or content mutation of a backend appends one [`Event`]
//! to that backend's [`EventQueue`]. The queue prunes itself on every push
//! according to its [`RetentionPolicy`], so an unwatched backend keeps only
//! a bounded, recent window of events.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::config::{EVENT_MIN_RETENTION, WatchConfig};
use crate::path;

/// Operations an event reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventOps {
    /// An entry was created.
    pub create: bool,
    /// File content changed.
    pub write: bool,
    /// An entry was removed.
    pub remove: bool,
    /// An entry was moved to this path.
    pub rename: bool,
    /// Permissions changed.
    pub chmod: bool,
}

impl EventOps {
    /// Creation.
    pub const CREATE: Self = Self {
        create: true,
        write: false,
        remove: false,
        rename: false,
        chmod: false,
    };

    /// Content write or truncation.
    pub const WRITE: Self = Self {
        create: false,
        write: true,
        remove: false,
        rename: false,
        chmod: false,
    };

    /// Removal.
    pub const REMOVE: Self = Self {
        create: false,
        write: false,
        remove: true,
        rename: false,
        chmod: false,
    };

    /// Rename, reported on the destination path.
    pub const RENAME: Self = Self {
        create: false,
        write: false,
        remove: false,
        rename: true,
        chmod: false,
    };

    /// Returns `true` if the only operation is a write.
    pub fn is_write_only(&self) -> bool {
        *self == Self::WRITE
    }
}

/// A change observed on a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Path of the entry; directory paths end with `/`.
    pub path: String,
    /// What happened.
    pub ops: EventOps,
    /// When it happened.
    pub timestamp: SystemTime,
}

impl Event {
    /// Event on a file, stamped now.
    pub fn file(path: &str, ops: EventOps) -> Self {
        Self {
            path: path.to_string(),
            ops,
            timestamp: SystemTime::now(),
        }
    }

    /// Event on a directory, stamped now.
    pub fn dir(path: &str, ops: EventOps) -> Self {
        Self::file(&path::as_dir_path(path), ops)
    }

    /// Path of the event as a [`PathBuf`].
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// How long queued events are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Events at least this old are pruned.
    pub max_age: Duration,
    /// Upper bound on the queue length, oldest dropped first.
    pub max_len: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for RetentionPolicy {
    fn from(config: &WatchConfig) -> Self {
        Self {
            max_age: config.retention.max(EVENT_MIN_RETENTION),
            max_len: None,
        }
    }
}

/// Thread-safe FIFO of events with front pruning.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    policy: RetentionPolicy,
}

impl EventQueue {
    /// Empty queue with the given policy.
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            policy,
        }
    }

    /// The retention policy.
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Append an event, pruning expired ones first.
    pub fn push(&self, event: Event) {
        let now = event.timestamp;
        let mut events = self.events.lock();
        prune(&mut events, &self.policy, now);
        events.push_back(event);
        if let Some(max_len) = self.policy.max_len {
            while events.len() > max_len {
                events.pop_front();
            }
        }
    }

    /// Remove events expired at `now`.
    pub fn prune_at(&self, now: SystemTime) {
        prune(&mut self.events.lock(), &self.policy, now);
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.events.lock().drain(..).collect()
    }

    /// Drop every queued event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns `true` if no event is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(events: &mut VecDeque<Event>, policy: &RetentionPolicy, now: SystemTime) {
    while let Some(front) = events.front() {
        let age = now.duration_since(front.timestamp).unwrap_or(Duration::ZERO);
        if age < policy.max_age {
            break;
        }
        events.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(path: &str, timestamp: SystemTime) -> Event {
        Event {
            path: path.into(),
            ops: EventOps::CREATE,
            timestamp,
        }
    }

    #[test]
    fn directory_events_have_trailing_separator() {
        assert_eq!(Event::dir("/d", EventOps::CREATE).path, "/d/");
        assert_eq!(Event::dir("/", EventOps::WRITE).path, "/");
        assert_eq!(Event::file("/f", EventOps::WRITE).path, "/f");
    }

    #[test]
    fn push_prunes_expired_front() {
        let queue = EventQueue::new(RetentionPolicy {
            max_age: Duration::from_millis(50),
            max_len: None,
        });
        let start = SystemTime::now();
        queue.push(at("/a", start));
        queue.push(at("/b", start + Duration::from_millis(10)));
        queue.push(at("/c", start + Duration::from_millis(55)));

        let paths: Vec<String> = queue.drain().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn prune_at_empties_old_queue() {
        let queue = EventQueue::default();
        let start = SystemTime::now();
        queue.push(at("/a", start));
        queue.prune_at(start + Duration::from_secs(1));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn max_len_bounds_queue() {
        let queue = EventQueue::new(RetentionPolicy {
            max_age: Duration::from_secs(60),
            max_len: Some(2),
        });
        let now = SystemTime::now();
        for p in ["/a", "/b", "/c"] {
            queue.push(at(p, now));
        }
        let paths: Vec<String> = queue.drain().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
    }

    #[test]
    fn default_policy_keeps_events_at_least_fifty_millis() {
        assert_eq!(RetentionPolicy::default().max_age, Duration::from_millis(50));
    }

    #[test]
    fn write_only_detection() {
        assert!(EventOps::WRITE.is_write_only());
        let both = EventOps {
            create: true,
            write: true,
            ..Default::default()
        };
        assert!(!both.is_write_only());
    }
}
