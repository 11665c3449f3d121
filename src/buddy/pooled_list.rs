//! Pooled linked list implementation using the node arena
//!
//! Provides address-ordered doubly linked lists whose nodes live in a
//! [`NodeArena`]. Each buddy order keeps one such list, so a block's buddy
//! is always one of its two immediate neighbours.

#[cfg(feature = "log")]
use log::{error, warn};

use super::{
    buddy_block::BuddyBlock,
    node_arena::{NodeArena, NodeHandle},
};
use crate::{AllocError, AllocResult};

/// Pooled linked list - uses nodes from the arena
///
/// This maintains only the list structure (head/tail/len), while
/// all nodes are allocated from the arena.
pub struct PooledLinkedList {
    head: Option<NodeHandle>,
    tail: Option<NodeHandle>,
    len: usize,
}

impl PooledLinkedList {
    /// Create a new empty pooled linked list
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Link a detached node in sorted order (ascending by offset)
    ///
    /// This is a linear scan, O(len). Returns [`AllocError::NotAllocated`]
    /// if a block with the same offset is already listed.
    pub fn insert_sorted(&mut self, arena: &mut NodeArena, handle: NodeHandle) -> AllocResult {
        let offset = match arena.block(handle) {
            Some(block) => block.offset,
            None => {
                error!("Insert of invalid node {:?}", handle);
                return Err(AllocError::InvalidParam);
            }
        };

        // Find insertion position
        let mut prev_idx = None;
        let mut current_idx = self.head;
        let mut visited = 0;

        while let Some(idx) = current_idx {
            if visited > self.len {
                error!("Potential cycle detected during insert");
                return Err(AllocError::InvalidParam);
            }

            let node = match arena.get_node(idx) {
                Some(node) => node,
                None => {
                    error!("Invalid node reference in list");
                    return Err(AllocError::InvalidParam);
                }
            };
            if node.block.offset == offset {
                return Err(AllocError::NotAllocated);
            }
            if node.block.offset > offset {
                break; // Found position
            }
            prev_idx = current_idx;
            current_idx = node.next;
            visited += 1;
        }

        if let Some(node) = arena.get_node_mut(handle) {
            node.prev = prev_idx;
            node.next = current_idx;
        }

        // Update links
        match prev_idx.and_then(|prev| arena.get_node_mut(prev)) {
            Some(prev_node) => prev_node.next = Some(handle),
            None => self.head = Some(handle),
        }
        match current_idx.and_then(|next| arena.get_node_mut(next)) {
            Some(next_node) => next_node.prev = Some(handle),
            None => self.tail = Some(handle),
        }

        self.len += 1;
        Ok(())
    }

    /// Link a detached node after the current tail in O(1)
    ///
    /// The node's offset must be above every listed offset; used when
    /// building lists from blocks already sorted by offset.
    pub fn push_back(&mut self, arena: &mut NodeArena, handle: NodeHandle) -> AllocResult {
        let offset = arena
            .block(handle)
            .ok_or(AllocError::InvalidParam)?
            .offset;
        if let Some(tail) = self.tail.and_then(|tail| arena.block(tail)) {
            if tail.offset >= offset {
                warn!(
                    "push_back of offset {} after tail offset {}",
                    offset, tail.offset
                );
                return Err(AllocError::InvalidParam);
            }
        }

        if let Some(node) = arena.get_node_mut(handle) {
            node.prev = self.tail;
            node.next = None;
        }
        match self.tail.and_then(|tail| arena.get_node_mut(tail)) {
            Some(tail_node) => tail_node.next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.len += 1;
        Ok(())
    }

    /// Detach the head node; it stays live in the arena
    pub fn pop_front(&mut self, arena: &mut NodeArena) -> Option<NodeHandle> {
        let head_idx = self.head?;
        if self.unlink(arena, head_idx) {
            Some(head_idx)
        } else {
            error!("Head node {:?} is corrupted", head_idx);
            None
        }
    }

    /// Detach a node from this list in O(1); it stays live in the arena
    ///
    /// Returns false, leaving the list untouched, if the node is not linked
    /// into this list.
    pub fn unlink(&mut self, arena: &mut NodeArena, handle: NodeHandle) -> bool {
        let (prev_idx, next_idx) = match arena.get_node(handle) {
            Some(node) => (node.prev, node.next),
            None => {
                warn!("Invalid node index {:?} for unlink", handle);
                return false;
            }
        };

        // Verify both neighbours point back at the node
        let prev_ok = match prev_idx {
            Some(prev) => arena.get_node(prev).map_or(false, |n| n.next == Some(handle)),
            None => self.head == Some(handle),
        };
        let next_ok = match next_idx {
            Some(next) => arena.get_node(next).map_or(false, |n| n.prev == Some(handle)),
            None => self.tail == Some(handle),
        };
        if !prev_ok || !next_ok {
            warn!("Node {:?} is not linked into this list", handle);
            return false;
        }

        match prev_idx.and_then(|prev| arena.get_node_mut(prev)) {
            Some(prev_node) => prev_node.next = next_idx,
            None => self.head = next_idx,
        }
        match next_idx.and_then(|next| arena.get_node_mut(next)) {
            Some(next_node) => next_node.prev = prev_idx,
            None => self.tail = prev_idx,
        }

        if let Some(node) = arena.get_node_mut(handle) {
            node.prev = None;
            node.next = None;
        }
        self.len -= 1;
        true
    }

    /// List successor of a linked node
    pub fn next_of(&self, arena: &NodeArena, handle: NodeHandle) -> Option<NodeHandle> {
        arena.get_node(handle)?.next
    }

    /// List predecessor of a linked node
    pub fn prev_of(&self, arena: &NodeArena, handle: NodeHandle) -> Option<NodeHandle> {
        arena.get_node(handle)?.prev
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the length of the list
    pub fn len(&self) -> usize {
        self.len
    }

    /// Get iterator over elements
    pub fn iter<'a>(&'a self, arena: &'a NodeArena) -> PooledListIter<'a> {
        PooledListIter {
            arena,
            current: self.head,
            remaining: self.len,
        }
    }

    /// Clear all nodes from the list
    ///
    /// Returns all nodes to the arena
    pub fn clear(&mut self, arena: &mut NodeArena) {
        while let Some(handle) = self.pop_front(arena) {
            arena.dealloc_node(handle);
        }
    }
}

impl Default for PooledLinkedList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator for PooledLinkedList
pub struct PooledListIter<'a> {
    arena: &'a NodeArena,
    current: Option<NodeHandle>,
    remaining: usize,
}

impl<'a> Iterator for PooledListIter<'a> {
    type Item = &'a BuddyBlock;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.current.and_then(|idx| {
            if let Some(node) = self.arena.get_node(idx) {
                self.current = node.next;
                self.remaining -= 1;
                Some(&node.block)
            } else {
                self.current = None;
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn offsets(list: &PooledLinkedList, arena: &NodeArena) -> Vec<usize> {
        list.iter(arena).map(|b| b.offset).collect()
    }

    #[test]
    fn test_pooled_list_basic() {
        let mut arena = NodeArena::new();
        let mut list = PooledLinkedList::new();

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);

        for offset in [1, 2, 3] {
            let h = arena.alloc_node(BuddyBlock::new(0, offset));
            list.insert_sorted(&mut arena, h).unwrap();
        }
        assert_eq!(list.len(), 3);

        let h = list.pop_front(&mut arena).unwrap();
        assert_eq!(arena.block(h), Some(BuddyBlock::new(0, 1)));
        // Popped node is detached but still live
        assert!(arena.get_node(h).unwrap().next.is_none());
        arena.dealloc_node(h);
        assert_eq!(list.len(), 2);

        list.clear(&mut arena);
        assert!(list.is_empty());
        assert_eq!(arena.live_node_count(), 0);
    }

    #[test]
    fn test_insert_sorted() {
        let mut arena = NodeArena::new();
        let mut list = PooledLinkedList::new();

        for offset in [5, 3, 7, 1] {
            let h = arena.alloc_node(BuddyBlock::new(0, offset));
            list.insert_sorted(&mut arena, h).unwrap();
        }

        assert_eq!(offsets(&list, &arena), [1, 3, 5, 7]);
    }

    #[test]
    fn test_push_back() {
        let mut arena = NodeArena::new();
        let mut list = PooledLinkedList::new();

        for offset in [0, 1024, 2048] {
            let h = arena.alloc_node(BuddyBlock::new(10, offset));
            list.push_back(&mut arena, h).unwrap();
        }
        assert_eq!(offsets(&list, &arena), [0, 1024, 2048]);

        let h = arena.alloc_node(BuddyBlock::new(10, 1024));
        assert_eq!(list.push_back(&mut arena, h), Err(AllocError::InvalidParam));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_insert_duplicate() {
        let mut arena = NodeArena::new();
        let mut list = PooledLinkedList::new();

        let h1 = arena.alloc_node(BuddyBlock::new(0, 4));
        list.insert_sorted(&mut arena, h1).unwrap();
        let h2 = arena.alloc_node(BuddyBlock::new(0, 4));
        assert_eq!(
            list.insert_sorted(&mut arena, h2),
            Err(AllocError::NotAllocated)
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_unlink_and_neighbours() {
        let mut arena = NodeArena::new();
        let mut list = PooledLinkedList::new();

        let handles: Vec<_> = [1, 2, 3]
            .into_iter()
            .map(|offset| {
                let h = arena.alloc_node(BuddyBlock::new(0, offset));
                list.insert_sorted(&mut arena, h).unwrap();
                h
            })
            .collect();

        assert_eq!(list.next_of(&arena, handles[1]), Some(handles[2]));
        assert_eq!(list.prev_of(&arena, handles[1]), Some(handles[0]));

        assert!(list.unlink(&mut arena, handles[1]));
        assert_eq!(offsets(&list, &arena), [1, 3]);
        assert_eq!(list.next_of(&arena, handles[0]), Some(handles[2]));
        assert_eq!(list.prev_of(&arena, handles[2]), Some(handles[0]));

        // Already detached
        assert!(!list.unlink(&mut arena, handles[1]));

        assert!(list.unlink(&mut arena, handles[2]));
        assert!(list.unlink(&mut arena, handles[0]));
        assert!(list.is_empty());
    }

    #[test]
    fn test_unlink_foreign_node() {
        let mut arena = NodeArena::new();
        let mut a = PooledLinkedList::new();
        let mut b = PooledLinkedList::new();

        let h = arena.alloc_node(BuddyBlock::new(0, 0));
        a.insert_sorted(&mut arena, h).unwrap();

        assert!(!b.unlink(&mut arena, h));
        assert_eq!(a.len(), 1);
    }
}
