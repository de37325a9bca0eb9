//! Trace allocator: a delegating wrapper that records every operation.
//!
//! [`Trace`] forwards `alloc`/`free` to a parent allocator and appends one
//! timestamped [`Event`] per call. It exists for tests and diagnostics:
//! wrap a parent, run a workload, then inspect how many allocations
//! happened, at what sizes, and whether every pointer was returned.
//!
//! The event log lives on the Rust global heap, not on the traced parent,
//! so recording an event can never recurse into the allocator being
//! observed.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::time::{SystemTime, UNIX_EPOCH};

use super::Alloc;

/// What a trace [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A successful delegated allocation.
    Alloc,
    /// A delegated free.
    Free,
}

/// One recorded allocator operation.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// Operation kind.
    pub kind: EventKind,
    /// Wall-clock seconds since the Unix epoch at the time of the call.
    pub at: u64,
    /// The pointer involved, as an address.
    pub ptr: usize,
    /// Requested size (0 for frees).
    pub size: usize,
    /// Requested alignment (0 for frees).
    pub align: usize,
}

/// Delegating allocator that records timestamped alloc/free events.
pub struct Trace<'p> {
    parent: &'p dyn Alloc,
    events: RefCell<Vec<Event>>,
}

impl<'p> Trace<'p> {
    /// Creates a tracing wrapper around `parent`.
    #[must_use]
    pub fn new(parent: &'p dyn Alloc) -> Self {
        Self {
            parent,
            events: RefCell::new(Vec::new()),
        }
    }

    /// Snapshot of the recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Number of recorded allocations.
    #[must_use]
    pub fn alloc_count(&self) -> usize {
        self.count(EventKind::Alloc)
    }

    /// Number of recorded frees.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.count(EventKind::Free)
    }

    /// Discards the recorded events.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn count(&self, kind: EventKind) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl Alloc for Trace<'_> {
    fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let ptr = self.parent.alloc(size, align)?;
        self.events.borrow_mut().push(Event {
            kind: EventKind::Alloc,
            at: Self::now(),
            ptr: ptr.as_ptr() as usize,
            size,
            align,
        });
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        self.events.borrow_mut().push(Event {
            kind: EventKind::Free,
            at: Self::now(),
            ptr: ptr.as_ptr() as usize,
            size: 0,
            align: 0,
        });
        // SAFETY: forwarded verbatim; the caller's obligations are ours.
        unsafe { self.parent.free(ptr) };
    }
}
