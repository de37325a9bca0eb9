//! Pool allocator: fixed-size slots recycled through a free list.
//!
//! A [`Pool`] serves exactly one allocation shape. Freed slots are threaded
//! onto an intrusive free list: the link lives inside the freed slot
//! itself, which is why a slot is never smaller than a pointer. When the
//! list runs dry the pool carves a fresh slab from its parent into
//! `block_len` slots.
//!
//! Allocation and free are O(1) pointer pushes/pops; reuse is LIFO.
//!
//! # Example
//!
//! ```
//! use cinder_rt::mem::{heap, Alloc, Pool};
//!
//! let pool = Pool::new(heap(), 24, 8);
//! let a = pool.alloc(24, 8).unwrap();
//! unsafe { pool.free(a) };
//! let b = pool.alloc(24, 8).unwrap();
//! assert_eq!(a, b); // the freed slot comes straight back
//! ```

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use super::{align_up, Alloc};

/// Target slab size carved from the parent on each growth.
pub const POOL_BLOCK_SIZE: usize = 4096;

/// Intrusive free-list link, stored in place inside a freed slot.
struct FreeSlot {
    next: *mut FreeSlot,
}

/// Fixed-size allocator over slabs from a parent allocator.
///
/// `alloc` asserts that the requested size and alignment match the values
/// the pool was configured with; mixing shapes in one pool is a contract
/// violation.
pub struct Pool<'p> {
    parent: &'p dyn Alloc,
    /// Size/align the pool was created with (asserted on alloc).
    size: usize,
    align: usize,
    /// Effective slot stride: at least a pointer, multiple of the slot
    /// alignment.
    slot_size: usize,
    slot_align: usize,
    block_len: usize,
    free_list: Cell<*mut FreeSlot>,
    blocks: RefCell<Vec<NonNull<u8>>>,
}

impl<'p> Pool<'p> {
    /// Creates a pool of `size`-byte, `align`-aligned slots.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or `size` is zero.
    #[must_use]
    pub fn new(parent: &'p dyn Alloc, size: usize, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(size > 0, "pool slot size must be non-zero");
        let slot_align = align.max(std::mem::align_of::<*mut FreeSlot>());
        // A freed slot stores the free-list link in place.
        let slot_size = align_up(
            size.max(std::mem::size_of::<*mut FreeSlot>()),
            slot_align,
        );
        Self {
            parent,
            size,
            align,
            slot_size,
            slot_align,
            block_len: POOL_BLOCK_SIZE.div_ceil(slot_size),
            free_list: Cell::new(std::ptr::null_mut()),
            blocks: RefCell::new(Vec::new()),
        }
    }

    /// Number of slabs drawn from the parent so far.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.borrow().len()
    }

    /// Slots carved out of each slab.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Carves a fresh slab into slots threaded onto the free list in
    /// reverse, so the slab's first slot ends up at the head.
    #[cold]
    fn grow(&self) -> Option<()> {
        let slab_size = self.block_len.checked_mul(self.slot_size)?;
        let slab = self.parent.alloc(slab_size, self.slot_align)?;
        self.blocks.borrow_mut().push(slab);

        let mut head = self.free_list.get();
        for i in (0..self.block_len).rev() {
            // SAFETY: i * slot_size < slab_size, the slot is inside the
            // slab and aligned for FreeSlot (slot_align >= pointer align).
            unsafe {
                let slot = slab.as_ptr().add(i * self.slot_size).cast::<FreeSlot>();
                (*slot).next = head;
                head = slot;
            }
        }
        self.free_list.set(head);
        Some(())
    }
}

impl Alloc for Pool<'_> {
    fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(
            size == self.size && align == self.align,
            "pool allocation shape mismatch: pool is {}x{}, request {}x{}",
            self.size,
            self.align,
            size,
            align
        );
        if self.free_list.get().is_null() {
            self.grow()?;
        }
        let head = self.free_list.get();
        // SAFETY: head is non-null (grow just refilled the list) and points
        // at a live FreeSlot inside one of our slabs.
        unsafe {
            self.free_list.set((*head).next);
            Some(NonNull::new_unchecked(head.cast::<u8>()))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        let slot = ptr.as_ptr().cast::<FreeSlot>();
        // SAFETY: ptr came from this pool, so the slot is big enough and
        // aligned for the in-place link.
        unsafe {
            (*slot).next = self.free_list.get();
        }
        self.free_list.set(slot);
    }
}

impl Drop for Pool<'_> {
    fn drop(&mut self) {
        let mut blocks = self.blocks.borrow_mut();
        for slab in blocks.drain(..) {
            // SAFETY: each slab was obtained from `self.parent` and is
            // released exactly once.
            unsafe { self.parent.free(slab) };
        }
        self.free_list.set(std::ptr::null_mut());
    }
}
