//! Single-pool buddy allocator using an arena of list nodes
//!
//! Implements the core buddy system for one contiguous range of pages. All
//! offsets are page indices relative to the start of the range.
//!
//! Free blocks of each order sit in an address-ordered list, so the buddy of
//! a freed block can only be its immediate predecessor or successor. Freeing
//! therefore needs one neighbour comparison per order walked upward, plus the
//! sorted insertion itself, which is a linear scan of the order list.

use alloc::vec::Vec;

use crate::{order_for_pages, AllocError, AllocResult, MAX_BLOCK_PAGES, MAX_ORDER};

#[cfg(feature = "log")]
use log::{debug, error, trace, warn};

use super::{
    buddy_block::BuddyBlock,
    node_arena::{ArenaStats, NodeArena, NodeHandle},
    pooled_list::{PooledLinkedList, PooledListIter},
    stats::BuddyStats,
};

/// Buddy allocator for a single pool of `total_pages` pages
///
/// Only `floor(total_pages / MAX_BLOCK_PAGES)` whole top-order blocks are
/// ever handed out; the trailing remainder is not covered by any block.
/// Allocated blocks are not tracked: once an offset is returned the caller
/// owns those pages until it frees them.
pub struct BuddyAllocator {
    total_pages: usize,
    arena: NodeArena,
    /// Free lists for each order
    free_lists: [PooledLinkedList; MAX_ORDER + 1],
}

impl BuddyAllocator {
    /// Create an allocator over `total_pages` pages, all of them free
    pub fn new(total_pages: usize) -> AllocResult<Self> {
        let mut allocator = Self::empty(total_pages)?;

        let num_blocks = total_pages / MAX_BLOCK_PAGES;
        for i in 0..num_blocks {
            let handle = allocator
                .arena
                .alloc_node(BuddyBlock::new(MAX_ORDER, i * MAX_BLOCK_PAGES));
            allocator.free_lists[MAX_ORDER].push_back(&mut allocator.arena, handle)?;
        }

        let remainder = total_pages % MAX_BLOCK_PAGES;
        if remainder != 0 {
            warn!(
                "buddy: {} of {} pages lie past the last {}-page block and are never allocated",
                remainder, total_pages, MAX_BLOCK_PAGES
            );
        }

        Ok(allocator)
    }

    /// Create an allocator whose free lists hold exactly `blocks`
    ///
    /// Blocks must be aligned to their size, fit in the usable range and not
    /// overlap each other. Pages not covered by any block are considered
    /// allocated.
    pub fn from_free_blocks(total_pages: usize, blocks: &[BuddyBlock]) -> AllocResult<Self> {
        let mut allocator = Self::empty(total_pages)?;
        let usable = allocator.usable_pages();

        let mut sorted: Vec<BuddyBlock> = blocks.to_vec();
        sorted.sort_unstable_by_key(|block| block.offset);

        let mut covered_end = 0;
        for block in &sorted {
            let end = if block.order > MAX_ORDER
                || !crate::is_aligned(block.offset, block.pages())
                || block.offset < covered_end
            {
                None
            } else {
                block.offset.checked_add(block.pages()).filter(|&end| end <= usable)
            };
            let Some(end) = end else {
                error!(
                    "buddy: rejecting free block at offset {} order {} (usable pages {})",
                    block.offset, block.order, usable
                );
                return Err(AllocError::InvalidParam);
            };
            covered_end = end;
        }

        // Globally sorted by offset, so every order list is sorted as well
        for block in sorted {
            let handle = allocator.arena.alloc_node(block);
            allocator.free_lists[block.order].push_back(&mut allocator.arena, handle)?;
        }

        Ok(allocator)
    }

    fn empty(total_pages: usize) -> AllocResult<Self> {
        if total_pages == 0 {
            error!("buddy: cannot manage an empty range");
            return Err(AllocError::InvalidParam);
        }

        Ok(Self {
            total_pages,
            arena: NodeArena::with_capacity(total_pages / MAX_BLOCK_PAGES),
            free_lists: [const { PooledLinkedList::new() }; MAX_ORDER + 1],
        })
    }

    /// Allocate `num_pages` contiguous pages, rounded up to a power of two
    ///
    /// Returns the page offset of the block.
    pub fn allocate(&mut self, num_pages: usize) -> AllocResult<usize> {
        if num_pages == 0 || num_pages > MAX_BLOCK_PAGES {
            error!(
                "buddy: page count {} outside [1, {}]",
                num_pages, MAX_BLOCK_PAGES
            );
            return Err(AllocError::InvalidParam);
        }

        let order = order_for_pages(num_pages);
        let handle = self.find_buddy(order)?;
        let block = self
            .arena
            .dealloc_node(handle)
            .ok_or(AllocError::InvalidParam)?;

        trace!(
            "buddy: allocated {} pages at offset {} (order {})",
            num_pages,
            block.offset,
            order
        );
        Ok(block.offset)
    }

    /// Return a single page to the free lists, merging with free buddies
    pub fn deallocate(&mut self, offset: usize) -> AllocResult {
        if offset >= self.usable_pages() {
            error!(
                "buddy: free of page {} outside usable range [0, {})",
                offset,
                self.usable_pages()
            );
            return Err(AllocError::InvalidParam);
        }
        if let Some(_order) = self.free_order_of(offset) {
            warn!("buddy: page {} already free in an order {} block", offset, _order);
            return Err(AllocError::NotAllocated);
        }

        let handle = self.arena.alloc_node(BuddyBlock::new(0, offset));
        self.insert_buddy(handle, 0)
    }

    /// Order of the merged free block that already covers page `offset`
    ///
    /// Order 0 is left to the duplicate check of the sorted insertion.
    fn free_order_of(&self, offset: usize) -> Option<usize> {
        (1..=MAX_ORDER).find(|&order| {
            let base = offset & !((1 << order) - 1);
            self.free_lists[order]
                .iter(&self.arena)
                .take_while(|block| block.offset <= base)
                .any(|block| block.offset == base)
        })
    }

    /// Take one detached block of `order`, splitting larger blocks as needed
    ///
    /// The returned node is live in the arena but linked into no list.
    fn find_buddy(&mut self, order: usize) -> AllocResult<NodeHandle> {
        if let Some(handle) = self.free_lists[order].pop_front(&mut self.arena) {
            return Ok(handle);
        }

        if order == MAX_ORDER {
            debug!("buddy: no free block of order {} or above", MAX_ORDER);
            return Err(AllocError::NoMemory);
        }

        let bigger = self.find_buddy(order + 1)?;
        let block = self.arena.block(bigger).ok_or(AllocError::InvalidParam)?;
        let (lower, upper) = block.split();

        // The larger record is reused for the lower half kept by the caller
        if let Some(node) = self.arena.get_node_mut(bigger) {
            node.block = lower;
        }
        let upper_handle = self.arena.alloc_node(upper);
        self.free_lists[order].insert_sorted(&mut self.arena, upper_handle)?;

        trace!(
            "buddy: split order {} block at {} into {} and {}",
            block.order,
            block.offset,
            lower.offset,
            upper.offset
        );
        Ok(bigger)
    }

    /// Link a detached block into the `order` list and merge it upward
    ///
    /// The buddy is looked for only among the immediate neighbours: the
    /// successor for a left half, the predecessor for a right half.
    fn insert_buddy(&mut self, handle: NodeHandle, order: usize) -> AllocResult {
        if let Err(e) = self.free_lists[order].insert_sorted(&mut self.arena, handle) {
            let _block = self.arena.dealloc_node(handle);
            warn!("buddy: free of {:?} rejected: {:?}", _block, e);
            return Err(e);
        }

        // maximum order: no merging happens
        if order == MAX_ORDER {
            return Ok(());
        }

        let block = self.arena.block(handle).ok_or(AllocError::InvalidParam)?;
        let list = &self.free_lists[order];
        let neighbour = if block.is_left_half() {
            list.next_of(&self.arena, handle)
        } else {
            list.prev_of(&self.arena, handle)
        };

        let partner = match neighbour {
            Some(partner)
                if self.arena.block(partner).map(|b| b.offset) == Some(block.buddy_offset()) =>
            {
                partner
            }
            _ => return Ok(()),
        };

        if !self.free_lists[order].unlink(&mut self.arena, partner)
            || !self.free_lists[order].unlink(&mut self.arena, handle)
        {
            error!("buddy: order {} list lost the pair at {}", order, block.offset);
            return Err(AllocError::InvalidParam);
        }
        self.arena.dealloc_node(partner);

        let parent = block.parent();
        if let Some(node) = self.arena.get_node_mut(handle) {
            node.block = parent;
        }

        trace!(
            "buddy: merged offsets {} and {} into order {} block",
            block.offset,
            block.buddy_offset(),
            parent.order
        );
        self.insert_buddy(handle, order + 1)
    }

    /// Pages in the range this allocator was created for
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Pages covered by whole top-order blocks
    pub fn usable_pages(&self) -> usize {
        self.total_pages / MAX_BLOCK_PAGES * MAX_BLOCK_PAGES
    }

    /// Pages currently sitting in the free lists
    pub fn free_pages(&self) -> usize {
        self.free_lists
            .iter()
            .enumerate()
            .map(|(order, list)| list.len() << order)
            .sum()
    }

    /// Get free blocks of a specific order as an iterator
    pub fn free_blocks(&self, order: usize) -> Option<PooledListIter<'_>> {
        self.free_lists.get(order).map(|list| list.iter(&self.arena))
    }

    /// Every free block, ordered by order and then by offset
    pub fn all_free_blocks(&self) -> impl Iterator<Item = BuddyBlock> + '_ {
        self.free_lists
            .iter()
            .flat_map(move |list| list.iter(&self.arena).copied())
    }

    /// Get the number of blocks in a specific order
    pub fn block_count(&self, order: usize) -> usize {
        self.free_lists.get(order).map_or(0, PooledLinkedList::len)
    }

    /// Get statistics for this pool
    pub fn stats(&self) -> BuddyStats {
        let mut stats = BuddyStats::new();
        stats.total_pages = self.total_pages;
        stats.usable_pages = self.usable_pages();

        for order in 0..=MAX_ORDER {
            let block_count = self.free_lists[order].len();
            stats.free_blocks_by_order[order] = block_count;
            stats.free_pages += block_count << order;
        }

        stats.used_pages = stats.usable_pages.saturating_sub(stats.free_pages);
        stats
    }

    /// Get arena statistics
    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Offsets of every order list, lowest order first
    fn shape(allocator: &BuddyAllocator) -> Vec<Vec<usize>> {
        (0..=MAX_ORDER)
            .map(|order| {
                allocator
                    .free_blocks(order)
                    .unwrap()
                    .map(|block| block.offset)
                    .collect()
            })
            .collect()
    }

    /// Checks list ordering and that free blocks plus `outstanding`
    /// allocations tile the usable range exactly.
    fn check_invariants(allocator: &BuddyAllocator, outstanding: &[(usize, usize)]) {
        let mut ranges: Vec<(usize, usize)> = outstanding.to_vec();
        for order in 0..=MAX_ORDER {
            let mut last = None;
            for block in allocator.free_blocks(order).unwrap() {
                assert_eq!(block.order, order);
                assert_eq!(block.offset % block.pages(), 0);
                if let Some(last) = last {
                    assert!(block.offset > last, "order {} list not sorted", order);
                }
                last = Some(block.offset);
                ranges.push((block.offset, block.pages()));
            }
        }

        ranges.sort_unstable();
        let mut cursor = 0;
        for (offset, pages) in ranges {
            assert_eq!(offset, cursor, "gap or overlap at page {}", cursor);
            cursor += pages;
        }
        assert_eq!(cursor, allocator.usable_pages());
    }

    #[test]
    fn test_init_two_top_blocks() {
        let allocator = BuddyAllocator::new(2048).unwrap();
        assert_eq!(shape(&allocator)[MAX_ORDER], [0, 1024]);
        for order in 0..MAX_ORDER {
            assert_eq!(allocator.block_count(order), 0);
        }
        assert_eq!(allocator.free_pages(), 2048);
        check_invariants(&allocator, &[]);
    }

    #[test]
    fn test_init_rejects_empty_range() {
        assert_eq!(
            BuddyAllocator::new(0).err(),
            Some(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_init_remainder_not_covered() {
        let allocator = BuddyAllocator::new(1500).unwrap();
        assert_eq!(allocator.usable_pages(), 1024);
        assert_eq!(shape(&allocator)[MAX_ORDER], [0]);

        let mut small = BuddyAllocator::new(1000).unwrap();
        assert_eq!(small.usable_pages(), 0);
        assert_eq!(small.allocate(1), Err(AllocError::NoMemory));
    }

    #[test]
    fn test_first_allocation_splits_down() {
        let mut allocator = BuddyAllocator::new(2048).unwrap();
        assert_eq!(allocator.allocate(1), Ok(0));

        let shape = shape(&allocator);
        for order in 0..MAX_ORDER {
            assert_eq!(shape[order], [1 << order], "order {}", order);
        }
        assert_eq!(shape[MAX_ORDER], [1024]);
        check_invariants(&allocator, &[(0, 1)]);
    }

    #[test]
    fn test_allocate_rounds_up() {
        let mut allocator = BuddyAllocator::new(1024).unwrap();
        let a = allocator.allocate(3).unwrap();
        let b = allocator.allocate(5).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 8);
        check_invariants(&allocator, &[(a, 4), (b, 8)]);
    }

    #[test]
    fn test_allocate_invalid_sizes() {
        let mut allocator = BuddyAllocator::new(2048).unwrap();
        assert_eq!(allocator.allocate(0), Err(AllocError::InvalidParam));
        assert_eq!(allocator.allocate(1025), Err(AllocError::InvalidParam));
        check_invariants(&allocator, &[]);
    }

    #[test]
    fn test_exhaustion_reports_no_memory() {
        let mut allocator = BuddyAllocator::new(2048).unwrap();
        assert_eq!(allocator.allocate(1024), Ok(0));
        assert_eq!(allocator.allocate(1024), Ok(1024));
        assert_eq!(allocator.allocate(1024), Err(AllocError::NoMemory));
        assert_eq!(allocator.allocate(1), Err(AllocError::NoMemory));
        assert_eq!(allocator.free_pages(), 0);
        check_invariants(&allocator, &[(0, 1024), (1024, 1024)]);
    }

    #[test]
    fn test_round_trip_restores_shape() {
        let mut allocator = BuddyAllocator::new(2048).unwrap();
        let keep = allocator.allocate(4).unwrap();
        let before = shape(&allocator);

        let offset = allocator.allocate(1).unwrap();
        allocator.deallocate(offset).unwrap();

        assert_eq!(shape(&allocator), before);
        check_invariants(&allocator, &[(keep, 4)]);
    }

    #[test]
    fn test_cascading_merge() {
        let mut allocator = BuddyAllocator::new(1024).unwrap();
        let a = allocator.allocate(1).unwrap();
        let b = allocator.allocate(1).unwrap();
        let c = allocator.allocate(1).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        // Order 0 now holds page 3 only; order 1 is empty
        assert_eq!(shape(&allocator)[0], [3]);
        assert_eq!(allocator.block_count(1), 0);

        allocator.deallocate(a).unwrap();
        allocator.deallocate(b).unwrap();
        // 0 and 1 merge into one 2-page block; its buddy [2, 4) is not free
        let after = shape(&allocator);
        assert_eq!(after[0], [3]);
        assert_eq!(after[1], [0]);
        assert_eq!(allocator.block_count(2), 0);
        check_invariants(&allocator, &[(c, 1)]);

        // Freeing 2 merges with 3, then with [0, 2), and so on up to order 10
        allocator.deallocate(c).unwrap();
        let after = shape(&allocator);
        for order in 0..MAX_ORDER {
            assert!(after[order].is_empty(), "order {} not empty", order);
        }
        assert_eq!(after[MAX_ORDER], [0]);
        check_invariants(&allocator, &[]);
    }

    #[test]
    fn test_right_half_merges_with_predecessor() {
        let mut allocator = BuddyAllocator::new(1024).unwrap();
        let a = allocator.allocate(1).unwrap();
        let b = allocator.allocate(1).unwrap();

        allocator.deallocate(b).unwrap();
        assert_eq!(shape(&allocator)[0], [1]);
        allocator.deallocate(a).unwrap();
        assert_eq!(shape(&allocator)[MAX_ORDER], [0]);
        check_invariants(&allocator, &[]);
    }

    #[test]
    fn test_no_merge_across_top_blocks() {
        let mut allocator = BuddyAllocator::new(2048).unwrap();
        let a = allocator.allocate(1024).unwrap();
        let b = allocator.allocate(1024).unwrap();
        assert_eq!(allocator.allocate(1), Err(AllocError::NoMemory));

        for page in (a..a + 1024).chain(b..b + 1024) {
            allocator.deallocate(page).unwrap();
        }

        // Adjacent top-order blocks stay separate
        assert_eq!(shape(&allocator)[MAX_ORDER], [0, 1024]);
        check_invariants(&allocator, &[]);
    }

    #[test]
    fn test_double_free_detected() {
        let mut allocator = BuddyAllocator::new(1024).unwrap();
        let a = allocator.allocate(1).unwrap();
        let _b = allocator.allocate(1).unwrap();
        allocator.deallocate(a).unwrap();
        let before = shape(&allocator);

        assert_eq!(allocator.deallocate(a), Err(AllocError::NotAllocated));
        assert_eq!(shape(&allocator), before);
        assert_eq!(allocator.arena_stats().live_nodes, allocator.all_free_blocks().count());
    }

    #[test]
    fn test_double_free_after_merge_detected() {
        let mut allocator = BuddyAllocator::new(2048).unwrap();
        let a = allocator.allocate(1).unwrap();
        allocator.deallocate(a).unwrap();
        let before = shape(&allocator);
        assert_eq!(before[MAX_ORDER], [0, 1024]);

        // Page `a` now sits inside a top-order free block
        assert_eq!(allocator.deallocate(a), Err(AllocError::NotAllocated));
        assert_eq!(allocator.deallocate(1500), Err(AllocError::NotAllocated));
        assert_eq!(shape(&allocator), before);
        assert_eq!(allocator.free_pages(), 2048);

        // Same inside a mid-order block
        let b = allocator.allocate(1).unwrap();
        assert_eq!(allocator.deallocate(b + 5), Err(AllocError::NotAllocated));
        assert_eq!(allocator.deallocate(b + 1), Err(AllocError::NotAllocated));
        allocator.deallocate(b).unwrap();
        check_invariants(&allocator, &[]);
    }

    #[test]
    fn test_merge_stops_on_broken_links() {
        let mut allocator = BuddyAllocator::new(1024).unwrap();
        assert_eq!(allocator.allocate(1), Ok(0));

        // Point the free page-1 record at itself so it no longer unlinks cleanly
        let list = &mut allocator.free_lists[0];
        let handle = list.pop_front(&mut allocator.arena).unwrap();
        list.push_back(&mut allocator.arena, handle).unwrap();
        allocator.arena.get_node_mut(handle).unwrap().next = Some(handle);

        assert_eq!(allocator.deallocate(0), Err(AllocError::InvalidParam));
        // No merged block was produced from the broken pair
        assert_eq!(shape(&allocator)[1], [2]);
    }

    #[test]
    fn test_deallocate_out_of_range() {
        let mut allocator = BuddyAllocator::new(1500).unwrap();
        assert_eq!(allocator.deallocate(1024), Err(AllocError::InvalidParam));
        assert_eq!(allocator.deallocate(4096), Err(AllocError::InvalidParam));
    }

    #[test]
    fn test_remainder_never_allocated() {
        let mut allocator = BuddyAllocator::new(1500).unwrap();
        let mut outstanding = Vec::new();
        loop {
            match allocator.allocate(1) {
                Ok(offset) => {
                    assert!(offset < 1024);
                    outstanding.push((offset, 1));
                }
                Err(e) => {
                    assert_eq!(e, AllocError::NoMemory);
                    break;
                }
            }
        }
        assert_eq!(outstanding.len(), 1024);
        check_invariants(&allocator, &outstanding);
    }

    #[test]
    fn test_page_by_page_free_coalesces_fully() {
        let mut allocator = BuddyAllocator::new(4096).unwrap();
        let mut blocks = Vec::new();
        for pages in [1, 2, 4, 16, 64, 256, 1024, 3, 7] {
            let offset = allocator.allocate(pages).unwrap();
            blocks.push((offset, pages.next_power_of_two()));
        }
        check_invariants(&allocator, &blocks);

        // Return everything one page at a time, in reverse
        while let Some((offset, pages)) = blocks.pop() {
            for page in (offset..offset + pages).rev() {
                allocator.deallocate(page).unwrap();
            }
            check_invariants(&allocator, &blocks);
        }

        assert_eq!(shape(&allocator)[MAX_ORDER], [0, 1024, 2048, 3072]);
        assert_eq!(allocator.arena_stats().live_nodes, 4);
    }

    #[test]
    fn test_interleaved_workload_keeps_invariants() {
        let mut allocator = BuddyAllocator::new(3 * 1024 + 100).unwrap();
        let mut outstanding: Vec<(usize, usize)> = Vec::new();
        let mut seed: u32 = 0x2545_f491;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed as usize
        };

        for _ in 0..2000 {
            if outstanding.is_empty() || next() % 3 != 0 {
                let pages = 1 << (next() % 6);
                match allocator.allocate(pages) {
                    Ok(offset) => outstanding.push((offset, pages)),
                    Err(e) => assert_eq!(e, AllocError::NoMemory),
                }
            } else {
                let (offset, pages) = outstanding.swap_remove(next() % outstanding.len());
                for page in offset..offset + pages {
                    allocator.deallocate(page).unwrap();
                }
            }
        }
        check_invariants(&allocator, &outstanding);
    }

    #[test]
    fn test_from_free_blocks() {
        let blocks = [
            BuddyBlock::new(9, 512),
            BuddyBlock::new(0, 1),
            BuddyBlock::new(1, 2),
            BuddyBlock::new(10, 1024),
        ];
        let mut allocator = BuddyAllocator::from_free_blocks(2048, &blocks).unwrap();
        assert_eq!(allocator.free_pages(), 512 + 1 + 2 + 1024);
        assert_eq!(shape(&allocator)[0], [1]);
        check_invariants(
            &allocator,
            &[(0, 1), (4, 4), (8, 8), (16, 16), (32, 32), (64, 64), (128, 128), (256, 256)],
        );

        // Restored lists merge like any other
        allocator.deallocate(0).unwrap();
        let after = shape(&allocator);
        assert!(after[0].is_empty());
        assert!(after[1].is_empty());
        assert_eq!(after[2], [0]);
    }

    #[test]
    fn test_from_free_blocks_rejects_bad_layout() {
        let overlap = [BuddyBlock::new(2, 0), BuddyBlock::new(0, 3)];
        assert_eq!(
            BuddyAllocator::from_free_blocks(1024, &overlap).err(),
            Some(AllocError::InvalidParam)
        );

        let misaligned = [BuddyBlock::new(2, 2)];
        assert!(BuddyAllocator::from_free_blocks(1024, &misaligned).is_err());

        let past_end = [BuddyBlock::new(10, 1024)];
        assert!(BuddyAllocator::from_free_blocks(1500, &past_end).is_err());

        let too_big = [BuddyBlock::new(11, 0)];
        assert!(BuddyAllocator::from_free_blocks(4096, &too_big).is_err());

        // Aligned, but the end wraps around the address space
        let wraps = [BuddyBlock::new(MAX_ORDER, usize::MAX - (MAX_BLOCK_PAGES - 1))];
        assert_eq!(
            BuddyAllocator::from_free_blocks(1024, &wraps).err(),
            Some(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_stats_are_read_only() {
        let mut allocator = BuddyAllocator::new(1500).unwrap();
        allocator.allocate(3).unwrap();

        let first = allocator.stats();
        let second = allocator.stats();
        assert_eq!(first, second);
        assert_eq!(first.total_pages, 1500);
        assert_eq!(first.usable_pages, 1024);
        assert_eq!(first.free_pages, 1020);
        assert_eq!(first.used_pages, 4);
        assert_eq!(first.free_blocks_by_order[2], 1);
    }
}
