//! Arena allocator: growing blocks, freed in one sweep.
//!
//! An [`Arena`] bump-allocates out of blocks drawn from a parent allocator.
//! Individual frees are no-ops; the arena gives everything back at once
//! through [`Arena::reset`] (or on drop). Block sizes double on every
//! growth, and a single oversized request stretches the new block to fit,
//! so allocation cost stays amortised O(1) regardless of the starting
//! block size.
//!
//! # Example
//!
//! ```
//! use cinder_rt::mem::{heap, Alloc, Arena};
//!
//! let arena = Arena::new(heap());
//! let a = arena.alloc(24, 8).unwrap();
//! let b = arena.alloc(24, 8).unwrap();
//! assert_ne!(a, b);
//! assert_eq!(arena.block_count(), 1);
//! ```

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use super::{align_up, Alloc};

/// Smallest block an arena will request from its parent.
pub const ARENA_MIN_BLOCK: usize = 8;

/// Default starting block size for [`Arena::new`].
pub const ARENA_DEFAULT_BLOCK: usize = 4096;

/// Minimum alignment of blocks requested from the parent.
pub const ARENA_BLOCK_ALIGN: usize = 16;

/// Arena allocator over a parent allocator.
///
/// The first block is requested lazily at the configured block size; each
/// subsequent growth doubles it. Per-allocation [`free`](Alloc::free) is a
/// no-op; [`reset`](Arena::reset) returns every block to the parent.
pub struct Arena<'p> {
    parent: &'p dyn Alloc,
    block_size: Cell<usize>,
    blocks: RefCell<Vec<NonNull<u8>>>,
    next: Cell<*mut u8>,
    end: Cell<*mut u8>,
}

impl<'p> Arena<'p> {
    /// Creates an arena with the default starting block size.
    #[must_use]
    pub fn new(parent: &'p dyn Alloc) -> Self {
        Self::with_block_size(parent, ARENA_DEFAULT_BLOCK)
    }

    /// Creates an arena whose first block will be `block_size` bytes
    /// (clamped to [`ARENA_MIN_BLOCK`]).
    #[must_use]
    pub fn with_block_size(parent: &'p dyn Alloc, block_size: usize) -> Self {
        Self {
            parent,
            block_size: Cell::new(block_size.max(ARENA_MIN_BLOCK)),
            blocks: RefCell::new(Vec::new()),
            next: Cell::new(std::ptr::null_mut()),
            end: Cell::new(std::ptr::null_mut()),
        }
    }

    /// Number of blocks currently held.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.borrow().len()
    }

    /// Returns every block to the parent allocator.
    ///
    /// All pointers previously handed out by this arena are invalidated.
    pub fn reset(&self) {
        let mut blocks = self.blocks.borrow_mut();
        for block in blocks.drain(..) {
            // SAFETY: each entry was obtained from `self.parent` and is
            // released exactly once.
            unsafe { self.parent.free(block) };
        }
        self.next.set(std::ptr::null_mut());
        self.end.set(std::ptr::null_mut());
    }

    /// Grow path: take a fresh block from the parent and place the pending
    /// allocation at its start. The arena is left untouched if the parent
    /// refuses.
    #[cold]
    fn alloc_grow(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let grown = if self.blocks.borrow().is_empty() {
            self.block_size.get()
        } else {
            self.block_size.get().checked_mul(2)?
        };
        let block_size = grown.max(size);
        let block_align = ARENA_BLOCK_ALIGN.max(align);
        let block = self.parent.alloc(block_size, block_align)?;

        self.blocks.borrow_mut().push(block);
        self.block_size.set(block_size);
        self.next.set(block.as_ptr().wrapping_add(size));
        self.end.set(block.as_ptr().wrapping_add(block_size));
        Some(block)
    }
}

impl Alloc for Arena<'_> {
    fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        let next = self.next.get();
        if !next.is_null() {
            let aligned = align_up(next as usize, align);
            if let Some(new_next) = aligned.checked_add(size) {
                if new_next <= self.end.get() as usize {
                    let ptr = next.wrapping_add(aligned - next as usize);
                    self.next
                        .set(next.wrapping_add(new_next - next as usize));
                    // SAFETY: aligned >= next, which is non-null.
                    return Some(unsafe { NonNull::new_unchecked(ptr) });
                }
            }
        }
        self.alloc_grow(size, align)
    }

    unsafe fn free(&self, _ptr: NonNull<u8>) {
        // Individual frees are no-ops; use reset().
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::heap;

    #[test]
    fn first_block_uses_configured_size() {
        let arena = Arena::with_block_size(heap(), 8);
        arena.alloc(6, 1).unwrap();
        assert_eq!(arena.block_count(), 1);
        // 2 bytes of slack left: the next 6-byte request must open a
        // second, doubled block.
        arena.alloc(6, 1).unwrap();
        assert_eq!(arena.block_count(), 2);
    }

    #[test]
    fn oversized_request_stretches_the_block() {
        let arena = Arena::with_block_size(heap(), 8);
        arena.alloc(100, 1).unwrap();
        assert_eq!(arena.block_count(), 1);
        // The stretched block holds exactly the request; the next byte
        // grows again.
        arena.alloc(1, 1).unwrap();
        assert_eq!(arena.block_count(), 2);
    }

    #[test]
    fn allocations_are_aligned_and_distinct() {
        let arena = Arena::new(heap());
        let mut seen = Vec::new();
        for _ in 0..100 {
            let ptr = arena.alloc(10, 8).unwrap();
            assert_eq!(ptr.as_ptr() as usize % 8, 0);
            assert!(!seen.contains(&ptr));
            seen.push(ptr);
        }
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn reset_clears_blocks_and_allows_reuse() {
        let arena = Arena::with_block_size(heap(), 64);
        for _ in 0..32 {
            arena.alloc(16, 8).unwrap();
        }
        assert!(arena.block_count() > 1);

        arena.reset();
        assert_eq!(arena.block_count(), 0);

        arena.alloc(16, 8).unwrap();
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn writes_to_separate_allocations_do_not_clobber() {
        let arena = Arena::with_block_size(heap(), 32);
        let ptrs: Vec<_> = (0..64u8)
            .map(|i| {
                let p = arena.alloc(4, 4).unwrap();
                unsafe { std::ptr::write_bytes(p.as_ptr(), i, 4) };
                (p, i)
            })
            .collect();
        for (p, i) in ptrs {
            unsafe {
                assert_eq!(*p.as_ptr(), i);
                assert_eq!(*p.as_ptr().add(3), i);
            }
        }
    }
}
