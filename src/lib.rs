//! Buddy-system page pools
//!
//! This crate manages fixed-size pages carved out of one or more disjoint,
//! contiguous address ranges, featuring:
//! - Buddy allocator with address-ordered, arena-backed free lists
//! - Page pools translating page offsets to absolute addresses
//! - Pool sets dispatching requests by positional pool id
//! - Save/restore of pool geometry through an injected checkpoint interface
//!
//! The allocator is single-threaded; callers provide mutual exclusion.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page shift (4 KiB pages)
pub const DEFAULT_PAGE_SHIFT: usize = 12;

/// Highest order tracked by the buddy free lists
pub const MAX_ORDER: usize = 10;

/// Largest block, and largest single request, in pages
pub const MAX_BLOCK_PAGES: usize = 1 << MAX_ORDER;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid page count, page shift or address (e.g. unaligned).
    InvalidParam,
    /// Address ranges handed to `populate` overlap each other.
    MemoryOverlap,
    /// No enough memory to allocate.
    NoMemory,
    /// Deallocate a page that is already free.
    NotAllocated,
    /// Pool id does not name a pool.
    PoolNotFound,
    /// A checkpoint field is missing or holds an impossible value.
    BadCheckpoint,
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

/// Smallest order whose block holds `num_pages` pages.
#[inline]
const fn order_for_pages(num_pages: usize) -> usize {
    num_pages.next_power_of_two().trailing_zeros() as usize
}

pub mod buddy;
pub use buddy::{BuddyAllocator, BuddyBlock, BuddyStats};

pub mod checkpoint;
pub use checkpoint::{with_section, CheckpointIn, CheckpointOut, CheckpointSection, MemCheckpoint};

pub mod page_pool;
pub use page_pool::{PagePool, PoolInfo};

pub mod pool_set;
pub use pool_set::PoolSet;
