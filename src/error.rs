//! Error types for the Cinder runtime-support library.
//!
//! The library distinguishes exactly two kinds of failure:
//!
//! - **Allocation failure**: an underlying allocator reported out-of-memory.
//!   This is propagated as a value ([`Error::OutOfMemory`]) and the operation
//!   that hit it leaves its receiver unchanged.
//! - **Contract violations** (pool size/align mismatch, rewinding a temp
//!   allocator to a foreign mark, relocating an absent key): these are
//!   programmer errors and are asserted, not returned.
//!
//! Keyed-lookup misses are not errors; they are `None` or the default slot.

use std::fmt;

/// Errors that can occur in the Cinder runtime-support library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An underlying allocator could not satisfy a request.
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
        /// Requested alignment.
        align: usize,
    },

    /// A size computation overflowed `usize`.
    CapacityOverflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, align } => {
                write!(
                    f,
                    "allocation failed: {requested} bytes, alignment {align}"
                )
            }
            Self::CapacityOverflow => write!(f, "capacity overflow"),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
