//! Engine handle accounting.
//!
//! Two kinds of handle are counted:
//!
//! 1. **Explicit** handles, issued by a successful credential open and
//!    released by `close`. IDs auto-increment from 1 (0 is never issued).
//! 2. **Implicit** handles, one per thread that touches the open container
//!    without owning an explicit handle. A thread's implicit handle is
//!    released automatically when the thread exits.
//!
//! The sum is what [`StorageEngine::instance_count`] reports, which lets a
//! session refuse to unmount while other threads are still working.
//!
//! [`StorageEngine::instance_count`]: crate::engine::StorageEngine::instance_count

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::trace;

use crate::engine::EngineHandle;

#[derive(Debug)]
pub(crate) struct HandleRegistry {
    /// Explicit handle ID → thread that opened it.
    explicit: DashMap<u64, ThreadId>,
    implicit: DashSet<ThreadId>,
    next_id: AtomicU64,
}

/// Releases a thread's implicit handle when the thread-local is destroyed.
struct ThreadSlot {
    registry: Weak<HandleRegistry>,
    thread: ThreadId,
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade()
            && registry.implicit.remove(&self.thread).is_some()
        {
            trace!(thread = ?self.thread, "Implicit handle released on thread exit");
        }
    }
}

thread_local! {
    static SLOTS: RefCell<Vec<ThreadSlot>> = const { RefCell::new(Vec::new()) };
}

impl HandleRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            explicit: DashMap::new(),
            implicit: DashSet::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue an explicit handle owned by the current thread.
    pub(crate) fn open(&self) -> EngineHandle {
        let thread = thread::current().id();
        // The owner's work is covered by its explicit handle
        self.implicit.remove(&thread);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.explicit.entry(id) {
                entry.insert(thread);
                return EngineHandle::from_raw(id);
            }
        }
    }

    /// Release an explicit handle.
    ///
    /// Returns the number of explicit handles left, or `None` if the handle
    /// was not open.
    pub(crate) fn close(&self, handle: EngineHandle) -> Option<usize> {
        self.explicit
            .remove(&handle.as_raw())
            .map(|_| self.explicit.len())
    }

    /// Record that the current thread is using the container.
    pub(crate) fn touch(self: &Arc<Self>) {
        let thread = thread::current().id();
        if self.explicit.iter().any(|entry| *entry.value() == thread) {
            return;
        }
        if !self.implicit.insert(thread) {
            return;
        }
        trace!(thread = ?thread, "Implicit handle opened");

        // Thread-locals may already be torn down if we are called from a
        // destructor; the handle is then simply never reclaimed by this thread.
        let _ = SLOTS.try_with(|slots| {
            let mut slots = slots.borrow_mut();
            let me = Arc::downgrade(self);
            slots.retain(|slot| slot.registry.strong_count() > 0);
            if !slots.iter().any(|slot| Weak::ptr_eq(&slot.registry, &me)) {
                slots.push(ThreadSlot {
                    registry: me,
                    thread,
                });
            }
        });
    }

    /// Forget every implicit handle, used when the container is finalized.
    pub(crate) fn clear_implicit(&self) {
        self.implicit.clear();
    }

    pub(crate) fn explicit_count(&self) -> usize {
        self.explicit.len()
    }

    pub(crate) fn count(&self) -> usize {
        self.explicit.len() + self.implicit.len()
    }
}
