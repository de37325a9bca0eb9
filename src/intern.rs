//! Name interning: one canonical copy of every distinct byte string.
//!
//! A [`NameMap`] owns an arena of immutable, NUL-terminated name nodes and
//! hands out [`Name`] handles. Interning the same bytes twice yields the
//! same handle, so equality between names is a pointer comparison, which is the
//! property identifier-heavy code (symbol tables, field lookups) leans on.
//!
//! Internally the map keys nodes by the 64-bit byte hash: a primary
//! hash-to-node map answers almost every probe, and the rare distinct
//! strings that share a full 64-bit hash go to a collision list scanned
//! linearly. Node storage comes from the map's own arena, so dropping the
//! map releases every name in one sweep.
//!
//! # Example
//!
//! ```
//! use cinder_rt::intern::NameMap;
//!
//! let mut names = NameMap::new();
//! let a = names.intern_str("window_width").unwrap();
//! let b = names.intern_str("window_width").unwrap();
//! let c = names.intern_str("window_height").unwrap();
//!
//! assert_eq!(a, b);
//! assert_ne!(a, c);
//! assert_eq!(a.as_str(), Some("window_width"));
//! ```

use std::fmt;
use std::ptr::NonNull;

use crate::buf::{Buf, Map};
use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::mem::{heap, Alloc, Arena};

/// Flattened name storage: the length, then `len + 1` bytes (the last one
/// always NUL) directly after the struct.
#[repr(C)]
struct NameNode {
    len: u32,
    bytes: [u8; 0],
}

/// Nullable node pointer stored inside the bookkeeping arrays.
#[derive(Clone, Copy, PartialEq, Eq)]
struct NodeRef(*mut NameNode);

impl Default for NodeRef {
    fn default() -> Self {
        Self(std::ptr::null_mut())
    }
}

impl NodeRef {
    fn name(self) -> Name {
        debug_assert!(!self.0.is_null());
        // SAFETY: node refs handed out by NameMap are never null.
        Name(unsafe { NonNull::new_unchecked(self.0) })
    }

    /// Byte comparison against a candidate string.
    fn matches(self, bytes: &[u8]) -> bool {
        self.name().as_bytes() == bytes
    }
}

/// Handle to an interned name.
///
/// `Name` is a thin pointer into its map's arena: copying it is free and
/// two names are equal exactly when they were interned from equal bytes in
/// the same map. A name must not outlive the [`NameMap`] that produced it;
/// the bytes it points at are released when the map drops.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Name(NonNull<NameNode>);

impl Name {
    /// Length of the name in bytes (the trailing NUL not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        // SAFETY: the node lives as long as the owning map.
        unsafe { (*self.0.as_ptr()).len as usize }
    }

    /// True for the empty name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The interned bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `len` bytes follow the header, written at interning time
        // and immutable afterwards.
        unsafe {
            let data = std::ptr::addr_of!((*self.0.as_ptr()).bytes).cast::<u8>();
            std::slice::from_raw_parts(data, self.len())
        }
    }

    /// The interned bytes including the guaranteed trailing NUL.
    #[must_use]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        // SAFETY: as as_bytes; the node allocation covers len + 1 bytes.
        unsafe {
            let data = std::ptr::addr_of!((*self.0.as_ptr()).bytes).cast::<u8>();
            std::slice::from_raw_parts(data, self.len() + 1)
        }
    }

    /// The name as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Name({s:?})"),
            None => write!(f, "Name({:?})", self.as_bytes()),
        }
    }
}

/// Interning table of immutable byte strings.
///
/// Owns an arena for node storage plus two bookkeeping arrays (the primary
/// hash map and the collision list); all three draw from the parent
/// allocator the map was created with, and everything is released when the
/// map drops.
pub struct NameMap<'p> {
    arena: Arena<'p>,
    /// Primary table: byte hash to node.
    names: Map<'p, u64, NodeRef>,
    /// Distinct strings whose full hash collided with a primary entry.
    collisions: Buf<'p, (u64, NodeRef)>,
}

impl NameMap<'static> {
    /// Creates a name map on the process-default allocator.
    ///
    /// # Panics
    ///
    /// Panics if the initial allocations fail.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(heap()).expect("failed to allocate name map")
    }
}

impl Default for NameMap<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> NameMap<'p> {
    /// Creates a name map drawing from `parent`.
    pub fn new_in(parent: &'p dyn Alloc) -> Result<Self> {
        Ok(Self {
            arena: Arena::new(parent),
            names: Map::new_in(parent)?,
            collisions: Buf::new_in(parent)?,
        })
    }

    /// Number of distinct names interned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len() + self.collisions.len()
    }

    /// True if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interns a byte string, returning its canonical handle.
    ///
    /// The first interning copies the bytes into the map's arena and
    /// NUL-terminates them; later internings of equal bytes return the
    /// same handle without allocating.
    pub fn intern(&mut self, bytes: &[u8]) -> Result<Name> {
        self.intern_hashed(hash_bytes(bytes), bytes)
    }

    /// [`intern`](Self::intern) for string slices.
    pub fn intern_str(&mut self, s: &str) -> Result<Name> {
        self.intern(s.as_bytes())
    }

    /// True if `bytes` has already been interned.
    #[must_use]
    pub fn contains(&self, bytes: &[u8]) -> bool {
        let h = hash_bytes(bytes);
        match self.names.try_get(&h) {
            Some(node) if node.matches(bytes) => true,
            Some(_) => self
                .collisions
                .iter()
                .any(|&(ch, node)| ch == h && node.matches(bytes)),
            None => false,
        }
    }

    fn intern_hashed(&mut self, h: u64, bytes: &[u8]) -> Result<Name> {
        match self.names.try_get(&h).copied() {
            Some(node) if node.matches(bytes) => Ok(node.name()),
            Some(_) => {
                // Full-hash collision: the primary slot holds a different
                // string with the same hash.
                for &(ch, node) in self.collisions.iter() {
                    if ch == h && node.matches(bytes) {
                        return Ok(node.name());
                    }
                }
                let node = self.new_node(bytes)?;
                self.collisions.push((h, node))?;
                Ok(node.name())
            }
            None => {
                let node = self.new_node(bytes)?;
                self.names.insert(h, node)?;
                Ok(node.name())
            }
        }
    }

    /// Copies `bytes` into an arena-backed node with a trailing NUL.
    fn new_node(&mut self, bytes: &[u8]) -> Result<NodeRef> {
        let len = u32::try_from(bytes.len()).map_err(|_| Error::CapacityOverflow)?;
        let size = std::mem::size_of::<NameNode>() + bytes.len() + 1;
        let align = std::mem::align_of::<NameNode>();
        let ptr = self.arena.alloc(size, align).ok_or(Error::OutOfMemory {
            requested: size,
            align,
        })?;

        let node = ptr.cast::<NameNode>().as_ptr();
        // SAFETY: the allocation covers the header plus len + 1 bytes.
        unsafe {
            std::ptr::addr_of_mut!((*node).len).write(len);
            let data = std::ptr::addr_of_mut!((*node).bytes).cast::<u8>();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
            data.add(bytes.len()).write(0);
        }
        Ok(NodeRef(node))
    }
}

impl fmt::Debug for NameMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameMap")
            .field("len", &self.len())
            .field("collisions", &self.collisions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_intern_to_the_same_name() {
        let mut names = NameMap::new();
        let a = names.intern(b"alpha").unwrap();
        let b = names.intern(b"alpha").unwrap();
        let c = names.intern(b"beta").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn name_exposes_bytes_and_nul() {
        let mut names = NameMap::new();
        let n = names.intern(b"ptr").unwrap();

        assert_eq!(n.len(), 3);
        assert_eq!(n.as_bytes(), b"ptr");
        assert_eq!(n.as_bytes_with_nul(), b"ptr\0");
        assert_eq!(n.as_str(), Some("ptr"));
    }

    #[test]
    fn empty_name_is_internable() {
        let mut names = NameMap::new();
        let e1 = names.intern(b"").unwrap();
        let e2 = names.intern_str("").unwrap();
        assert_eq!(e1, e2);
        assert!(e1.is_empty());
        assert_eq!(e1.as_bytes_with_nul(), b"\0");
    }

    #[test]
    fn non_utf8_names_have_no_str_form() {
        let mut names = NameMap::new();
        let n = names.intern(&[0xff, 0xfe]).unwrap();
        assert_eq!(n.as_str(), None);
        assert_eq!(n.as_bytes(), &[0xff, 0xfe]);
    }

    #[test]
    fn full_hash_collisions_chain_and_stay_distinct() {
        let mut names = NameMap::new();
        // Force three different strings through the same hash bucket.
        let a = names.intern_hashed(42, b"first").unwrap();
        let b = names.intern_hashed(42, b"second").unwrap();
        let c = names.intern_hashed(42, b"third").unwrap();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(names.len(), 3);

        // Every chained entry resolves back to its own node.
        assert_eq!(names.intern_hashed(42, b"first").unwrap(), a);
        assert_eq!(names.intern_hashed(42, b"second").unwrap(), b);
        assert_eq!(names.intern_hashed(42, b"third").unwrap(), c);
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn handles_stay_stable_across_growth() {
        let mut names = NameMap::new();
        let early: Vec<Name> = (0..32)
            .map(|i| names.intern_str(&format!("sym_{i}")).unwrap())
            .collect();

        // Push the map through several rehashes and arena blocks.
        for i in 32..2000 {
            names.intern_str(&format!("sym_{i}")).unwrap();
        }

        for (i, &name) in early.iter().enumerate() {
            let again = names.intern_str(&format!("sym_{i}")).unwrap();
            assert_eq!(again, name);
            assert_eq!(name.as_str().unwrap(), format!("sym_{i}"));
        }
        assert_eq!(names.len(), 2000);
    }

    #[test]
    fn contains_matches_intern_history() {
        let mut names = NameMap::new();
        assert!(!names.contains(b"x"));
        names.intern(b"x").unwrap();
        assert!(names.contains(b"x"));
        assert!(!names.contains(b"y"));
    }

    #[test]
    fn map_works_on_a_caller_allocator() {
        use crate::mem::Trace;

        let trace = Trace::new(heap());
        {
            let mut names = NameMap::new_in(&trace).unwrap();
            for i in 0..100 {
                names.intern_str(&format!("n{i}")).unwrap();
            }
            assert_eq!(names.len(), 100);
        }
        // Arena blocks and both bookkeeping arrays all came back.
        assert_eq!(trace.alloc_count(), trace.free_count());
    }
}
