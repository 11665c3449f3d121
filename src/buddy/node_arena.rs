//! Node arena for buddy free lists
//!
//! Provides a single slot arena of list nodes shared by all orders of one
//! pool. Lists refer to nodes by handle, so splitting and merging blocks only
//! moves indices around; no node is ever referenced after its slot is freed.

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::warn;

use super::buddy_block::BuddyBlock;

/// Index of a node slot in a [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

/// Doubly linked list node stored in the arena
#[derive(Debug, Clone, Copy)]
pub struct ListNode {
    pub block: BuddyBlock,
    pub prev: Option<NodeHandle>,
    pub next: Option<NodeHandle>,
}

impl ListNode {
    const fn detached(block: BuddyBlock) -> Self {
        Self {
            block,
            prev: None,
            next: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Occupied(ListNode),
    Vacant { next_free: Option<NodeHandle> },
}

/// Slot arena - every order list of a pool draws its nodes from here
///
/// Vacant slots form an intrusive free chain so freed slots are reused
/// before the backing vector grows.
pub struct NodeArena {
    slots: Vec<Slot>,
    /// Free chain head - first vacant slot
    free_head: Option<NodeHandle>,
    /// Current number of vacant slots
    free_nodes: usize,
    /// Allocation statistics
    total_allocations: usize,
    total_deallocations: usize,
}

impl NodeArena {
    /// Create an empty arena
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            free_nodes: 0,
            total_allocations: 0,
            total_deallocations: 0,
        }
    }

    /// Create an empty arena with room for `capacity` nodes
    pub fn with_capacity(capacity: usize) -> Self {
        let mut arena = Self::new();
        arena.slots.reserve(capacity);
        arena
    }

    /// Store `block` in a detached node and return its handle
    pub fn alloc_node(&mut self, block: BuddyBlock) -> NodeHandle {
        self.total_allocations += 1;
        let node = Slot::Occupied(ListNode::detached(block));

        if let Some(handle) = self.free_head {
            if let Some(Slot::Vacant { next_free }) = self.slots.get(handle.0).copied() {
                self.free_head = next_free;
                self.free_nodes -= 1;
                self.slots[handle.0] = node;
                return handle;
            }
            warn!("node arena: free chain points at occupied slot {}", handle.0);
            self.free_head = None;
            self.free_nodes = 0;
        }

        self.slots.push(node);
        NodeHandle(self.slots.len() - 1)
    }

    /// Release a node back to the arena, returning the block it carried
    ///
    /// The node should not be part of any active list when freed.
    pub fn dealloc_node(&mut self, handle: NodeHandle) -> Option<BuddyBlock> {
        let block = self.get_node(handle)?.block;
        self.slots[handle.0] = Slot::Vacant {
            next_free: self.free_head,
        };
        self.free_head = Some(handle);
        self.free_nodes += 1;
        self.total_deallocations += 1;
        Some(block)
    }

    /// Get a reference to a live node
    pub fn get_node(&self, handle: NodeHandle) -> Option<&ListNode> {
        match self.slots.get(handle.0) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    /// Get a mutable reference to a live node
    pub fn get_node_mut(&mut self, handle: NodeHandle) -> Option<&mut ListNode> {
        match self.slots.get_mut(handle.0) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    /// Block carried by a live node
    pub fn block(&self, handle: NodeHandle) -> Option<BuddyBlock> {
        self.get_node(handle).map(|node| node.block)
    }

    /// Get the number of vacant slots
    pub fn free_node_count(&self) -> usize {
        self.free_nodes
    }

    /// Get the number of live nodes
    pub fn live_node_count(&self) -> usize {
        self.slots.len() - self.free_nodes
    }

    /// Get arena statistics
    pub fn get_stats(&self) -> ArenaStats {
        ArenaStats {
            total_slots: self.slots.len(),
            free_nodes: self.free_nodes,
            live_nodes: self.live_node_count(),
            total_allocations: self.total_allocations,
            total_deallocations: self.total_deallocations,
        }
    }
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena statistics
#[derive(Debug, Default, Clone)]
pub struct ArenaStats {
    pub total_slots: usize,
    pub free_nodes: usize,
    pub live_nodes: usize,
    pub total_allocations: usize,
    pub total_deallocations: usize,
}
