//! Arena of open file handles.
//!
//! Every open handle owns one slot of its backend's [`HandleTable`]. A slot is
//! identified by a [`Handle`] (index + generation), so a stale id never
//! aliases a reused slot. Closing a handle frees exactly its own slot.
//!
//! The table is what lets the backend find the handles that follow a rename,
//! the writable handles a snapshot must flush, and everything still open at
//! close time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::{Handle, OpenFlags, path};

/// State shared between a handle object and its table slot.
#[derive(Debug)]
pub struct HandleShared {
    path: RwLock<String>,
    flags: OpenFlags,
    closed: AtomicBool,
}

impl HandleShared {
    /// Current normalized path of the file.
    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    /// Flags the handle was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Returns `true` once the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the handle closed. Returns `false` if it already was.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<(Arc<HandleShared>, T)>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
}

/// Slots of the open handles of one backend.
///
/// `T` is the content resource a handle works on.
pub struct HandleTable<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }
}

impl<T> std::fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("open", &self.len())
            .finish()
    }
}

impl<T> HandleTable<T> {
    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .entries
            .iter()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    /// Returns `true` if no handle is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> HandleTable<T> {
    /// Allocate a slot for a newly opened handle.
    pub fn insert(&self, path: &str, flags: OpenFlags, resource: T) -> (Handle, Arc<HandleShared>) {
        let shared = Arc::new(HandleShared {
            path: RwLock::new(path.to_string()),
            flags,
            closed: AtomicBool::new(false),
        });
        let mut slots = self.slots.lock();
        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                slots.entries.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (slots.entries.len() - 1) as u32
            }
        };
        let slot = &mut slots.entries[index as usize];
        slot.entry = Some((Arc::clone(&shared), resource));
        (Handle::from_parts(index, slot.generation), shared)
    }

    /// Free the slot of `handle`. Returns `false` for a stale or unknown id.
    pub fn remove(&self, handle: Handle) -> bool {
        let mut slots = self.slots.lock();
        let index = handle.index();
        let Some(slot) = slots.entries.get_mut(index as usize) else {
            return false;
        };
        if slot.generation != handle.generation() || slot.entry.is_none() {
            return false;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(index);
        true
    }

    /// Follow a subtree rename: every handle below `from` moves below `to`.
    pub fn rename_prefix(&self, from: &str, to: &str) {
        let slots = self.slots.lock();
        for (shared, _) in slots.entries.iter().filter_map(|slot| slot.entry.as_ref()) {
            let mut current = shared.path.write();
            if path::is_within(&current, from) {
                *current = path::relocate(&current, from, to);
            }
        }
    }

    /// Path and resource of every open handle allowing writes whose path is
    /// accepted by `include`.
    pub fn writable(&self, include: impl Fn(&str) -> bool) -> Vec<(String, T)> {
        let slots = self.slots.lock();
        slots
            .entries
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|(shared, _)| shared.flags.writes() && !shared.is_closed())
            .map(|(shared, resource)| (shared.path(), resource.clone()))
            .filter(|(path, _)| include(path))
            .collect()
    }

    /// Close every open handle and empty the table.
    pub fn drain(&self) -> Vec<(Arc<HandleShared>, T)> {
        let mut slots = self.slots.lock();
        let mut drained = Vec::new();
        let Slots { entries, free } = &mut *slots;
        for (index, slot) in entries.iter_mut().enumerate() {
            if let Some((shared, resource)) = slot.entry.take() {
                shared.mark_closed();
                slot.generation = slot.generation.wrapping_add(1);
                free.push(index as u32);
                drained.push((shared, resource));
            }
        }
        drained
    }
}
