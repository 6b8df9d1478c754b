//! # Watchers and the Dispatcher
//!
//! ## Overview
//!
//! A [`WatchRegistry`] is shared by the backends whose events should be
//! delivered. It owns the dispatcher thread: [`WatchRegistry::start`] spawns
//! it, [`WatchRegistry::stop`] joins it, and [`WatchRegistry::dispatch_once`]
//! runs a single pass synchronously (handy in tests).
//!
//! Each pass visits every registered backend:
//!
//! 1. closed watchers are dropped and a backend left without watchers is
//!    deregistered;
//! 2. the backend's queue is drained;
//! 3. write-only events on the same path are collapsed, the first kept;
//! 4. every live watcher receives, in order, the events its filter accepts
//!    and that were not stamped before the watcher was created.
//!
//! A panicking callback is caught and logged; it never stops dispatch.
//!
//! ## Example
//!
//! ```rust
//! use anyfs_store::{FsFiles, FsWatch, MemoryConfig, MemoryFs, WatchConfig, WatchRegistry};
//! use std::sync::{Arc, Mutex};
//!
//! let registry = WatchRegistry::new(WatchConfig::default()).unwrap();
//! let fs = MemoryFs::with_registry(MemoryConfig::default(), registry.clone()).unwrap();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let watcher = fs.watch("/...".into()).unwrap();
//! let sink = Arc::clone(&seen);
//! watcher.on_event(move |event| sink.lock().unwrap().push(event.path.clone()));
//!
//! fs.create(std::path::Path::new("/a.txt")).unwrap();
//! registry.dispatch_once();
//! assert_eq!(seen.lock().unwrap().as_slice(), ["/a.txt"]);
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::config::WatchConfig;
use crate::event::{Event, EventQueue, RetentionPolicy};
use crate::{FsError, PathPattern};

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct WatcherInner {
    filter: PathPattern,
    created: SystemTime,
    callbacks: RwLock<Vec<Callback>>,
    closed: AtomicBool,
}

/// A subscription to the events of one backend.
///
/// Cloning yields another reference to the same subscription.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("filter", &self.inner.filter)
            .field("created", &self.inner.created)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Watcher {
    pub(crate) fn new(filter: PathPattern) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                filter,
                created: SystemTime::now(),
                callbacks: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a callback run for every delivered event.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().push(Arc::new(callback));
    }

    /// Stop receiving events. The dispatcher drops the watcher on its next pass.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Creation time; earlier events are never delivered.
    pub fn created(&self) -> SystemTime {
        self.inner.created
    }

    /// The path filter.
    pub fn filter(&self) -> &PathPattern {
        &self.inner.filter
    }

    fn accepts(&self, event: &Event) -> bool {
        event.timestamp >= self.inner.created && self.inner.filter.matches(&event.path)
    }

    fn deliver(&self, event: &Event) {
        let callbacks: Vec<Callback> = self.inner.callbacks.read().clone();
        for callback in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(event)));
            if outcome.is_err() {
                warn!(path = %event.path, "watcher callback panicked");
            }
        }
    }
}

/// The watchers of one backend.
#[derive(Debug, Default)]
pub struct WatcherList {
    watchers: Mutex<Vec<Watcher>>,
}

impl WatcherList {
    /// Add a watcher.
    pub fn add(&self, watcher: Watcher) {
        self.watchers.lock().push(watcher);
    }

    /// Drop closed watchers and return the remaining ones.
    pub fn live(&self) -> Vec<Watcher> {
        let mut watchers = self.watchers.lock();
        watchers.retain(|watcher| !watcher.is_closed());
        watchers.clone()
    }

    /// Close and drop every watcher.
    pub fn close_all(&self) {
        for watcher in self.watchers.lock().drain(..) {
            watcher.close();
        }
    }
}

/// A backend whose events can be dispatched.
pub trait Watchable: Send + Sync {
    /// The backend's event queue.
    fn events(&self) -> &EventQueue;

    /// Live watchers, closed ones pruned.
    fn live_watchers(&self) -> Vec<Watcher>;

    /// Returns `true` once the backend started closing.
    fn is_closing(&self) -> bool;
}

struct Dispatcher {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

struct RegistryInner {
    config: WatchConfig,
    watched: Mutex<HashMap<u64, Weak<dyn Watchable>>>,
    next_id: AtomicU64,
    dispatcher: Mutex<Option<Dispatcher>>,
}

/// Registry of watched backends and owner of the dispatcher thread.
#[derive(Clone)]
pub struct WatchRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("config", &self.inner.config)
            .field("watched", &self.watched_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl WatchRegistry {
    /// Create a registry. The dispatcher is not started.
    pub fn new(config: WatchConfig) -> Result<Self, FsError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                watched: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    /// The registry configuration.
    pub fn config(&self) -> WatchConfig {
        self.inner.config
    }

    /// Retention policy matching the dispatcher tick, for backend queues.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from(&self.inner.config)
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, id: u64, backend: Weak<dyn Watchable>) {
        self.inner.watched.lock().insert(id, backend);
    }

    pub(crate) fn deregister(&self, id: u64) {
        if self.inner.watched.lock().remove(&id).is_some() {
            debug!(id, "backend deregistered from watch registry");
        }
    }

    /// Number of registered backends.
    pub fn watched_count(&self) -> usize {
        self.inner.watched.lock().len()
    }

    /// Returns `true` while the dispatcher thread runs.
    pub fn is_running(&self) -> bool {
        self.inner.dispatcher.lock().is_some()
    }

    /// Spawn the dispatcher thread. Starting a running registry does nothing.
    pub fn start(&self) -> Result<(), FsError> {
        let mut dispatcher = self.inner.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }
        let (stop, stopped) = mpsc::channel::<()>();
        let registry = Arc::downgrade(&self.inner);
        let tick = self.inner.config.tick;
        let thread = std::thread::Builder::new()
            .name("anyfs-watch".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(inner) = registry.upgrade() else {
                        break;
                    };
                    dispatch(&inner);
                }
            })
            .map_err(|e| FsError::io("spawn dispatcher", "", e))?;
        info!(tick_ms = tick.as_millis() as u64, "watch dispatcher started");
        *dispatcher = Some(Dispatcher { stop, thread });
        Ok(())
    }

    /// Stop the dispatcher thread and wait for it to exit.
    pub fn stop(&self) {
        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(Dispatcher { stop, thread }) = dispatcher {
            let _ = stop.send(());
            if thread.join().is_err() {
                warn!("watch dispatcher thread panicked");
            }
            info!("watch dispatcher stopped");
        }
    }

    /// Run one dispatch pass on the calling thread.
    pub fn dispatch_once(&self) {
        dispatch(&self.inner);
    }
}

fn dispatch(inner: &RegistryInner) {
    let targets: Vec<(u64, Weak<dyn Watchable>)> = inner
        .watched
        .lock()
        .iter()
        .map(|(id, backend)| (*id, Weak::clone(backend)))
        .collect();

    for (id, weak) in targets {
        let Some(backend) = weak.upgrade() else {
            inner.watched.lock().remove(&id);
            continue;
        };
        if backend.is_closing() {
            inner.watched.lock().remove(&id);
            continue;
        }

        let watchers = backend.live_watchers();
        let events = collapse_writes(backend.events().drain());
        if watchers.is_empty() {
            inner.watched.lock().remove(&id);
            trace!(id, dropped = events.len(), "no live watchers left");
            continue;
        }

        for watcher in &watchers {
            for event in events.iter().filter(|event| watcher.accepts(event)) {
                trace!(path = %event.path, ops = ?event.ops, "dispatching event");
                watcher.deliver(event);
            }
        }
    }
}

fn collapse_writes(events: Vec<Event>) -> Vec<Event> {
    let mut written: Vec<String> = Vec::new();
    let mut kept = Vec::with_capacity(events.len());
    for event in events {
        if !event.ops.is_write_only() {
            kept.push(event);
        } else if !written.contains(&event.path) {
            written.push(event.path.clone());
            kept.push(event);
        }
    }
    kept
}
