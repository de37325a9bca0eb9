//! Index strategies for keyed access to a [`Buf`](super::Buf).
//!
//! An index locates elements by key inside the buffer's backing array; it
//! stores *positions*, never elements. Two strategies exist:
//!
//! - [`Index::Linear`]: a stateless scan. Zero configuration, zero memory,
//!   right for small arrays.
//! - [`Index::Hash`]: an open-addressed table of `(position, hash)` slots
//!   with tombstoned deletes. The substrate swaps this in automatically
//!   once an array crosses the upgrade threshold.
//!
//! All operations take the backing slice alongside the key: the index
//! cannot answer a lookup by itself, it only narrows down which elements
//! to compare.

use std::hash::Hash;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::hash::hash_key;
use crate::mem::Alloc;

/// Slot sentinel: never occupied.
const EMPTY: u32 = 0xffff_ffff;

/// Slot sentinel: previously occupied, traversed but never matched.
const DELETED: u32 = 0xffff_fffe;

/// Smallest hash table capacity.
const MIN_CAP: usize = 16;

/// One hash table slot: element position and the key's truncated hash.
#[derive(Clone, Copy)]
struct Slot {
    i: u32,
    h: u32,
}

/// Outcome of a probe sequence.
enum Probe {
    /// Table slot holding the key's position.
    Match(usize),
    /// First empty table slot on the key's probe path.
    Vacant(usize),
}

/// Keyed-lookup strategy attached to a buffer.
pub enum Index<'a> {
    /// O(n) scan of the backing array; the default.
    Linear,
    /// Open-addressed hash table over element positions.
    Hash(HashIndex<'a>),
}

impl<'a> Index<'a> {
    /// True while the buffer still runs on the linear default.
    #[must_use]
    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear)
    }

    /// Finds the position of `key`, or `None`.
    pub fn get<K: Eq + Hash, V>(&self, items: &[(K, V)], key: &K) -> Option<usize> {
        match self {
            Self::Linear => items.iter().position(|entry| entry.0 == *key),
            Self::Hash(hash) => hash.get(items, key),
        }
    }

    /// Lookup for insertion: `Some(i)` if `key` is already present,
    /// `Ok(None)` after recording that a new element will be appended at
    /// `items.len()`.
    pub fn put<K: Eq + Hash, V>(
        &mut self,
        items: &[(K, V)],
        key: &K,
    ) -> Result<Option<usize>> {
        match self {
            Self::Linear => Ok(items.iter().position(|entry| entry.0 == *key)),
            Self::Hash(hash) => hash.put(items, key),
        }
    }

    /// Removes `key` from the index, returning its position.
    pub fn del<K: Eq + Hash, V>(&mut self, items: &[(K, V)], key: &K) -> Option<usize> {
        match self {
            Self::Linear => items.iter().position(|entry| entry.0 == *key),
            Self::Hash(hash) => hash.del(items, key),
        }
    }

    /// Records that `key` now lives at position `at` (rebuilds and
    /// delete-swaps). A no-op for the linear strategy.
    pub fn set<K: Eq + Hash, V>(
        &mut self,
        items: &[(K, V)],
        key: &K,
        at: usize,
    ) -> Result<()> {
        match self {
            Self::Linear => Ok(()),
            Self::Hash(hash) => hash.set(items, key, at),
        }
    }
}

/// Open-addressed hash table mapping keys to element positions.
///
/// Capacity is a power of two (at least 16); probing is linear on the
/// masked hash. Deleted slots become tombstones that keep probe chains
/// intact; occupancy counts live slots *and* tombstones, and crossing
/// three quarters of capacity triggers a rehash into a table sized for
/// the current element count, which drops the tombstones.
///
/// The slot array is owned through the allocator stored with the index
/// and released on drop.
pub struct HashIndex<'a> {
    alloc: &'a dyn Alloc,
    slots: NonNull<Slot>,
    cap: usize,
    /// Live slots plus tombstones.
    occupied: usize,
}

impl<'a> HashIndex<'a> {
    /// Creates an empty index with the minimum table size.
    pub fn new_in(alloc: &'a dyn Alloc) -> Result<Self> {
        Self::with_capacity_in(alloc, 0)
    }

    /// Creates an empty index sized so that `expected` entries fit without
    /// a rehash.
    pub fn with_capacity_in(alloc: &'a dyn Alloc, expected: usize) -> Result<Self> {
        let cap = Self::cap_for(expected);
        let slots = Self::alloc_table(alloc, cap)?;
        Ok(Self {
            alloc,
            slots,
            cap,
            occupied: 0,
        })
    }

    /// Table capacity (always a power of two).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Occupied slots, tombstones included.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Smallest power-of-two capacity whose load threshold exceeds
    /// `required`.
    fn cap_for(required: usize) -> usize {
        let mut cap = MIN_CAP;
        while Self::threshold(cap) <= required {
            cap <<= 1;
        }
        cap
    }

    /// Load threshold: three quarters of capacity.
    #[inline]
    fn threshold(cap: usize) -> usize {
        cap / 2 + cap / 4
    }

    fn alloc_table(alloc: &'a dyn Alloc, cap: usize) -> Result<NonNull<Slot>> {
        let bytes = cap
            .checked_mul(std::mem::size_of::<Slot>())
            .ok_or(Error::CapacityOverflow)?;
        let align = std::mem::align_of::<Slot>();
        let table = alloc.alloc(bytes, align).ok_or(Error::OutOfMemory {
            requested: bytes,
            align,
        })?;
        let slots = table.cast::<Slot>();
        // SAFETY: the allocation covers `cap` slots; mark them all empty.
        unsafe {
            for i in 0..cap {
                slots.as_ptr().add(i).write(Slot { i: EMPTY, h: 0 });
            }
        }
        Ok(slots)
    }

    #[inline]
    fn table(&self) -> &[Slot] {
        // SAFETY: `slots` covers `cap` initialised slots for our lifetime.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr(), self.cap) }
    }

    #[inline]
    fn slot_at(&mut self, idx: usize) -> &mut Slot {
        debug_assert!(idx < self.cap);
        // SAFETY: idx < cap, slots are initialised.
        unsafe { &mut *self.slots.as_ptr().add(idx) }
    }

    /// Walks the probe chain for `key`, skipping tombstones, until it hits
    /// the key's slot or the first genuinely empty slot.
    fn probe<K: Eq + Hash, V>(&self, items: &[(K, V)], key: &K, h: u32) -> Probe {
        let mask = self.cap - 1;
        let table = self.table();
        let mut idx = h as usize & mask;
        loop {
            let slot = table[idx];
            if slot.i == EMPTY {
                return Probe::Vacant(idx);
            }
            if slot.i != DELETED && slot.h == h && items[slot.i as usize].0 == *key {
                return Probe::Match(idx);
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Inserts into a table that is known to have room, probing for the
    /// first empty slot. Used by rehash, where no key comparison is needed
    /// (the source table held one slot per key).
    fn place(slots: NonNull<Slot>, cap: usize, slot: Slot) {
        let mask = cap - 1;
        let mut idx = slot.h as usize & mask;
        // SAFETY: idx stays masked below cap; the caller guarantees at
        // least one empty slot, so the walk terminates.
        unsafe {
            while (*slots.as_ptr().add(idx)).i != EMPTY {
                idx = (idx + 1) & mask;
            }
            slots.as_ptr().add(idx).write(slot);
        }
    }

    /// Rebuilds the table sized for `required` entries, dropping
    /// tombstones.
    fn rehash(&mut self, required: usize) -> Result<()> {
        let new_cap = Self::cap_for(required);
        let new_slots = Self::alloc_table(self.alloc, new_cap)?;

        let mut live = 0;
        for slot in self.table() {
            if slot.i < DELETED {
                Self::place(new_slots, new_cap, *slot);
                live += 1;
            }
        }

        // SAFETY: the old table came from our allocator and is replaced.
        unsafe { self.alloc.free(self.slots.cast()) };
        self.slots = new_slots;
        self.cap = new_cap;
        self.occupied = live;
        Ok(())
    }

    fn get<K: Eq + Hash, V>(&self, items: &[(K, V)], key: &K) -> Option<usize> {
        match self.probe(items, key, hash_key(key) as u32) {
            Probe::Match(idx) => Some(self.table()[idx].i as usize),
            Probe::Vacant(_) => None,
        }
    }

    fn put<K: Eq + Hash, V>(&mut self, items: &[(K, V)], key: &K) -> Result<Option<usize>> {
        debug_assert!(items.len() < DELETED as usize, "element count exceeds index range");
        let h = hash_key(key) as u32;
        match self.probe(items, key, h) {
            Probe::Match(idx) => Ok(Some(self.table()[idx].i as usize)),
            Probe::Vacant(idx) => {
                *self.slot_at(idx) = Slot {
                    i: items.len() as u32,
                    h,
                };
                self.fill_committed(idx, items.len() + 1)?;
                Ok(None)
            }
        }
    }

    /// Bookkeeping after filling a vacant slot: bump occupancy and rehash
    /// past the load threshold. A failed rehash rolls the fill back so the
    /// table is left as it was.
    fn fill_committed(&mut self, idx: usize, required: usize) -> Result<()> {
        self.occupied += 1;
        if self.occupied >= Self::threshold(self.cap) {
            if let Err(err) = self.rehash(required) {
                *self.slot_at(idx) = Slot { i: EMPTY, h: 0 };
                self.occupied -= 1;
                return Err(err);
            }
        }
        Ok(())
    }

    fn del<K: Eq + Hash, V>(&mut self, items: &[(K, V)], key: &K) -> Option<usize> {
        match self.probe(items, key, hash_key(key) as u32) {
            Probe::Match(idx) => {
                let slot = self.slot_at(idx);
                let old = slot.i as usize;
                slot.i = DELETED;
                Some(old)
            }
            Probe::Vacant(_) => None,
        }
    }

    fn set<K: Eq + Hash, V>(&mut self, items: &[(K, V)], key: &K, at: usize) -> Result<()> {
        debug_assert!(at < DELETED as usize, "position exceeds index range");
        let h = hash_key(key) as u32;
        match self.probe(items, key, h) {
            Probe::Match(idx) => {
                self.slot_at(idx).i = at as u32;
                Ok(())
            }
            Probe::Vacant(idx) => {
                *self.slot_at(idx) = Slot { i: at as u32, h };
                self.fill_committed(idx, items.len() + 1)
            }
        }
    }
}

impl Drop for HashIndex<'_> {
    fn drop(&mut self) {
        // SAFETY: the table came from our allocator, freed exactly once.
        unsafe { self.alloc.free(self.slots.cast()) };
    }
}
