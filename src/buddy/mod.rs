//! Buddy page allocator module
//!
//! This module provides the buddy system for a single pool:
//! - Slot arena holding every free-list record
//! - Sorted doubly linked lists for adjacency-based coalescing
//! - Per-order statistics and failure reporting

pub mod buddy_allocator;
pub mod buddy_block;
pub mod node_arena;
pub mod pooled_list;
pub mod stats;

pub use buddy_allocator::BuddyAllocator;
pub use buddy_block::BuddyBlock;
pub use node_arena::{ArenaStats, ListNode, NodeArena, NodeHandle};
pub use pooled_list::PooledLinkedList;
pub use stats::BuddyStats;
#[cfg(feature = "tracking")]
pub use stats::MemoryStatsReporter;
