//! Page pool: one buddy allocator placed at an absolute address.
//!
//! A pool covers the pages of a single `[start, end)` range. Addresses given
//! out and taken back are absolute; the buddy allocator underneath only sees
//! page offsets relative to the pool start.

use alloc::format;
use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::error;

use crate::buddy::{BuddyAllocator, BuddyBlock, BuddyStats};
use crate::checkpoint::{param_in_usize, param_out_usize, with_section, CheckpointIn, CheckpointOut};
use crate::{is_aligned, AllocError, AllocResult};

/// A pool descriptor used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    pub start_addr: usize,
    pub end_addr: usize,
    pub total_pages: usize,
    pub pool_id: usize,
}

/// Buddy-managed pages of one contiguous address range
pub struct PagePool {
    page_shift: usize,
    start_page: usize,
    /// Historical bump cursor; kept and persisted, never moved by allocation
    free_page_num: usize,
    total_pages: usize,
    buddy: BuddyAllocator,
}

impl PagePool {
    /// Create a pool over `[start, end)` with pages of `1 << page_shift` bytes
    ///
    /// `start` must be page aligned; a partial page at `end` is ignored.
    pub fn new(page_shift: usize, start: usize, end: usize) -> AllocResult<Self> {
        if page_shift >= usize::BITS as usize {
            error!("pool: page shift {} too large", page_shift);
            return Err(AllocError::InvalidParam);
        }
        if !is_aligned(start, 1 << page_shift) {
            error!(
                "pool: start {:#x} is not aligned to {:#x}",
                start,
                1usize << page_shift
            );
            return Err(AllocError::InvalidParam);
        }
        if end <= start {
            error!("pool: empty range [{:#x}, {:#x})", start, end);
            return Err(AllocError::InvalidParam);
        }

        let start_page = start >> page_shift;
        Self::from_geometry(
            page_shift,
            start_page,
            start_page,
            (end - start) >> page_shift,
            None,
        )
    }

    fn from_geometry(
        page_shift: usize,
        start_page: usize,
        free_page_num: usize,
        total_pages: usize,
        free_blocks: Option<&[BuddyBlock]>,
    ) -> AllocResult<Self> {
        if page_shift >= usize::BITS as usize {
            error!("pool: page shift {} too large", page_shift);
            return Err(AllocError::InvalidParam);
        }
        let fits = start_page
            .checked_add(total_pages)
            .and_then(|end_page| end_page.checked_mul(1 << page_shift))
            .is_some();
        if !fits {
            error!(
                "pool: {} pages at page {} overflow the address space",
                total_pages, start_page
            );
            return Err(AllocError::InvalidParam);
        }

        let buddy = match free_blocks {
            Some(blocks) => BuddyAllocator::from_free_blocks(total_pages, blocks)?,
            None => BuddyAllocator::new(total_pages)?,
        };

        Ok(Self {
            page_shift,
            start_page,
            free_page_num,
            total_pages,
            buddy,
        })
    }

    /// Allocate `num_pages` pages (1..=1024), returning an absolute address
    pub fn allocate(&mut self, num_pages: usize) -> AllocResult<usize> {
        let offset = self.buddy.allocate(num_pages)?;
        Ok(self.start_addr() + (offset << self.page_shift))
    }

    /// Free one page previously returned by [`allocate`](Self::allocate)
    ///
    /// Only `num_pages == 1` is accepted; larger blocks are returned one page
    /// at a time.
    pub fn deallocate(&mut self, addr: usize, num_pages: usize) -> AllocResult {
        if num_pages != 1 {
            error!(
                "pool: free of {} pages at {:#x}, only single pages are accepted",
                num_pages, addr
            );
            return Err(AllocError::InvalidParam);
        }
        if !is_aligned(addr, self.page_size()) {
            error!("pool: free of non-page-aligned address {:#x}", addr);
            return Err(AllocError::InvalidParam);
        }
        if !self.contains(addr) {
            error!(
                "pool: address {:#x} not in [{:#x}, {:#x})",
                addr,
                self.start_addr(),
                self.end_addr()
            );
            return Err(AllocError::InvalidParam);
        }

        self.buddy
            .deallocate((addr - self.start_addr()) >> self.page_shift)
    }

    pub fn page_shift(&self) -> usize {
        self.page_shift
    }

    pub fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    pub fn start_page(&self) -> usize {
        self.start_page
    }

    pub fn start_addr(&self) -> usize {
        self.start_page << self.page_shift
    }

    /// First address past the pool
    pub fn end_addr(&self) -> usize {
        (self.start_page + self.total_pages) << self.page_shift
    }

    /// Check if an address belongs to this pool
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start_addr() && addr < self.end_addr()
    }

    /// Legacy free-page cursor
    pub fn free_page(&self) -> usize {
        self.free_page_num
    }

    pub fn set_free_page(&mut self, value: usize) {
        self.free_page_num = value;
    }

    /// Legacy free-page cursor as an address
    pub fn free_page_addr(&self) -> usize {
        self.free_page_num << self.page_shift
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Pages that can ever be allocated
    pub fn usable_pages(&self) -> usize {
        self.buddy.usable_pages()
    }

    /// Pages currently in the free lists
    pub fn free_pages(&self) -> usize {
        self.buddy.free_pages()
    }

    pub fn allocated_pages(&self) -> usize {
        self.usable_pages().saturating_sub(self.free_pages())
    }

    pub fn total_bytes(&self) -> usize {
        self.total_pages << self.page_shift
    }

    pub fn free_bytes(&self) -> usize {
        self.free_pages() << self.page_shift
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_pages() << self.page_shift
    }

    /// Get the underlying buddy allocator
    pub fn buddy(&self) -> &BuddyAllocator {
        &self.buddy
    }

    pub fn stats(&self) -> BuddyStats {
        self.buddy.stats()
    }

    /// Get pool information
    pub fn info(&self, pool_id: usize) -> PoolInfo {
        PoolInfo {
            start_addr: self.start_addr(),
            end_addr: self.end_addr(),
            total_pages: self.total_pages,
            pool_id,
        }
    }

    /// Write geometry and free-list layout into the current section
    pub fn serialize<C: CheckpointOut + ?Sized>(&self, cp: &mut C) {
        param_out_usize(cp, "page_shift", self.page_shift);
        param_out_usize(cp, "start_page", self.start_page);
        param_out_usize(cp, "free_page_num", self.free_page_num);
        param_out_usize(cp, "total_pages", self.total_pages);

        let mut num_free_blocks = 0;
        for (i, block) in self.buddy.all_free_blocks().enumerate() {
            param_out_usize(cp, &format!("free_block{}_order", i), block.order);
            param_out_usize(cp, &format!("free_block{}_offset", i), block.offset);
            num_free_blocks += 1;
        }
        param_out_usize(cp, "num_free_blocks", num_free_blocks);
    }

    pub fn serialize_section<C: CheckpointOut + ?Sized>(&self, cp: &mut C, name: &str) {
        with_section(cp, name, |cp| self.serialize(cp));
    }

    /// Rebuild a pool from the current section
    ///
    /// Without a `num_free_blocks` field the pool comes back fully free.
    pub fn unserialize<C: CheckpointIn + ?Sized>(cp: &C) -> AllocResult<Self> {
        let page_shift = param_in_usize(cp, "page_shift")?;
        let start_page = param_in_usize(cp, "start_page")?;
        let free_page_num = param_in_usize(cp, "free_page_num")?;
        let total_pages = param_in_usize(cp, "total_pages")?;

        let free_blocks = match cp.param_in("num_free_blocks") {
            Some(_) => {
                let count = param_in_usize(cp, "num_free_blocks")?;
                // Sized by the fields actually present, not by the stored count
                let mut blocks = Vec::new();
                for i in 0..count {
                    let order = param_in_usize(cp, &format!("free_block{}_order", i))?;
                    let offset = param_in_usize(cp, &format!("free_block{}_offset", i))?;
                    blocks.push(BuddyBlock::new(order, offset));
                }
                Some(blocks)
            }
            None => None,
        };

        Self::from_geometry(
            page_shift,
            start_page,
            free_page_num,
            total_pages,
            free_blocks.as_deref(),
        )
        .map_err(|e| match e {
            AllocError::InvalidParam => AllocError::BadCheckpoint,
            other => other,
        })
    }

    pub fn unserialize_section<C: CheckpointIn + ?Sized>(cp: &mut C, name: &str) -> AllocResult<Self> {
        with_section(cp, name, |cp| Self::unserialize(&*cp))
    }
}
