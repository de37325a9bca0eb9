//! `cinder-rt`: runtime-support library for the Cinder language.
//!
//! This crate is the memory and container substrate the Cinder runtime and
//! compiler are built on:
//!
//! - **Composable allocators** behind one polymorphic contract: arena,
//!   temp (bump), pool, and a tracing wrapper ([`mem`]).
//! - **Scoped resources** with LIFO cleanup and non-local exit that
//!   unwinds them ([`scope`]).
//! - **One container shape** that serves as growable sequence, map, and
//!   set, with an index strategy that upgrades itself from linear scan to
//!   hash table under load ([`buf`]).
//! - **Name interning** for canonical identifier storage ([`intern`]).
//!
//! Everything is explicit about lifetime and ownership: there is no
//! garbage collection, no hidden global allocator state, and no internal
//! synchronisation; each value is single-threaded, and the scope
//! registry is per-thread.
//!
//! # Example
//!
//! ```
//! use cinder_rt::buf::Map;
//! use cinder_rt::mem::{heap, Arena};
//!
//! let arena = Arena::new(heap());
//! let mut fields: Map<'_, u32, u64> = Map::new_in(&arena).unwrap();
//!
//! fields.insert(1, 100).unwrap();
//! fields.insert(2, 200).unwrap();
//! assert_eq!(*fields.get(&1), 100);
//! assert_eq!(*fields.get(&9), 0); // misses read a zeroed default slot
//! ```

pub mod buf;
pub mod error;
pub mod hash;
pub mod intern;
pub mod mem;
pub mod scope;

// Re-export the working set.
pub use buf::{Buf, HashIndex, Index, Map, Set};
pub use error::{Error, Result};
pub use intern::{Name, NameMap};
pub use mem::{heap, Alloc, Arena, Heap, Pool, Temp, Trace};
pub use scope::{recover, Disposable, Panicked, RecoverCtx};
