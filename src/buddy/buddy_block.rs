//! Buddy block metadata
//!
//! Represents a run of pages in the buddy system by its pool-relative page
//! offset and order.

use core::cmp::Ordering;

/// Buddy block metadata
///
/// `offset` is a page index relative to the start of the pool. A block of
/// order `k` spans `2^k` pages and its offset is a multiple of `2^k`.
#[derive(Debug, Clone, Copy)]
pub struct BuddyBlock {
    pub order: usize,
    pub offset: usize,
}

impl BuddyBlock {
    /// Create a new buddy block
    pub const fn new(order: usize, offset: usize) -> Self {
        Self { order, offset }
    }

    /// Number of pages covered by this block
    pub const fn pages(&self) -> usize {
        1 << self.order
    }

    /// First page past the end of this block
    pub const fn end(&self) -> usize {
        self.offset + self.pages()
    }

    /// Whether this block is the lower half of its parent
    pub const fn is_left_half(&self) -> bool {
        self.offset % (self.pages() << 1) == 0
    }

    /// Calculate the buddy offset for this block
    /// The buddy is the other half of the parent block at the next higher order
    pub const fn buddy_offset(&self) -> usize {
        self.offset ^ self.pages()
    }

    /// Split into the lower and upper halves at `order - 1`.
    ///
    /// Must not be called on an order-0 block.
    pub const fn split(&self) -> (BuddyBlock, BuddyBlock) {
        let order = self.order - 1;
        (
            BuddyBlock::new(order, self.offset),
            BuddyBlock::new(order, self.offset + (1 << order)),
        )
    }

    /// The parent block formed by merging this block with its buddy
    pub const fn parent(&self) -> BuddyBlock {
        let offset = if self.is_left_half() {
            self.offset
        } else {
            self.buddy_offset()
        };
        BuddyBlock::new(self.order + 1, offset)
    }
}

/// Blocks sort by offset, ties broken by order
impl Ord for BuddyBlock {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.offset, self.order).cmp(&(other.offset, other.order))
    }
}

impl PartialOrd for BuddyBlock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BuddyBlock {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.order == other.order
    }
}

impl Eq for BuddyBlock {}
