//! Multi-pool page allocator
//!
//! Holds one [`PagePool`] per address range handed to [`PoolSet::populate`]
//! and dispatches requests by pool id, the position of the range in that
//! list. Ids survive a save/restore cycle because pools are written and
//! read back in id order.

use alloc::format;
use alloc::vec::Vec;
use core::ops::Range;

#[cfg(feature = "log")]
use log::{error, info};

use crate::buddy::BuddyStats;
use crate::checkpoint::{param_in_usize, param_out_usize, with_section, CheckpointIn, CheckpointOut};
use crate::page_pool::PagePool;
use crate::{AllocError, AllocResult, MAX_ORDER};

/// Ordered set of page pools indexed by positional id
pub struct PoolSet {
    page_shift: usize,
    pools: Vec<PagePool>,
}

impl PoolSet {
    /// Checkpoint section holding the whole set
    pub const SECTION: &'static str = "mempools";

    /// Create an empty set whose pools will use pages of `1 << page_shift` bytes
    pub const fn new(page_shift: usize) -> Self {
        Self {
            page_shift,
            pools: Vec::new(),
        }
    }

    /// Replace all pools with one pool per range, ids following input order
    ///
    /// Ranges must be page aligned at the start and pairwise disjoint. On
    /// error the current pools are left as they were.
    pub fn populate(&mut self, ranges: &[Range<usize>]) -> AllocResult {
        // Check for overlap between ranges
        for (i, a) in ranges.iter().enumerate() {
            for (j, b) in ranges.iter().enumerate().skip(i + 1) {
                if !(a.end <= b.start || a.start >= b.end) {
                    error!(
                        "pool set: range {} [{:#x}, {:#x}) overlaps range {} [{:#x}, {:#x})",
                        i, a.start, a.end, j, b.start, b.end
                    );
                    return Err(AllocError::MemoryOverlap);
                }
            }
        }

        let pools = ranges
            .iter()
            .map(|range| PagePool::new(self.page_shift, range.start, range.end))
            .collect::<AllocResult<Vec<_>>>()?;
        self.pools = pools;

        for (pool_id, pool) in self.pools.iter().enumerate() {
            info!(
                "pool set: pool {} [{:#x}, {:#x}) {} pages",
                pool_id,
                pool.start_addr(),
                pool.end_addr(),
                pool.total_pages()
            );
        }
        Ok(())
    }

    fn pool_mut(&mut self, pool_id: usize) -> AllocResult<&mut PagePool> {
        if pool_id >= self.pools.len() {
            error!("pool set: no pool {} (have {})", pool_id, self.pools.len());
            return Err(AllocError::PoolNotFound);
        }
        Ok(&mut self.pools[pool_id])
    }

    /// Get a pool by id
    pub fn pool(&self, pool_id: usize) -> AllocResult<&PagePool> {
        self.pools.get(pool_id).ok_or_else(|| {
            error!("pool set: no pool {} (have {})", pool_id, self.pools.len());
            AllocError::PoolNotFound
        })
    }

    /// Allocate `num_pages` pages from pool `pool_id`
    pub fn allocate(&mut self, num_pages: usize, pool_id: usize) -> AllocResult<usize> {
        let result = self.pool_mut(pool_id)?.allocate(num_pages);
        if result == Err(AllocError::NoMemory) {
            self.print_alloc_failure_stats(pool_id, num_pages);
        }
        result
    }

    /// Return one page at `addr` to pool `pool_id`
    pub fn deallocate(&mut self, addr: usize, num_pages: usize, pool_id: usize) -> AllocResult {
        self.pool_mut(pool_id)?.deallocate(addr, num_pages)
    }

    /// Size of pool `pool_id` in bytes
    pub fn pool_size(&self, pool_id: usize) -> AllocResult<usize> {
        Ok(self.pool(pool_id)?.total_bytes())
    }

    /// Free bytes left in pool `pool_id`
    pub fn pool_free_size(&self, pool_id: usize) -> AllocResult<usize> {
        Ok(self.pool(pool_id)?.free_bytes())
    }

    /// Find the pool that contains the given address
    pub fn find_pool_for_addr(&self, addr: usize) -> Option<usize> {
        self.pools.iter().position(|pool| pool.contains(addr))
    }

    pub fn page_shift(&self) -> usize {
        self.page_shift
    }

    /// Get number of pools
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pools in id order
    pub fn iter(&self) -> core::slice::Iter<'_, PagePool> {
        self.pools.iter()
    }

    /// Aggregated statistics of all pools
    pub fn stats(&self) -> BuddyStats {
        let mut total = BuddyStats::new();
        for pool in &self.pools {
            total.add(&pool.stats());
        }
        total
    }

    /// Write the whole set into the `mempools` section
    pub fn serialize<C: CheckpointOut + ?Sized>(&self, cp: &mut C) {
        with_section(cp, Self::SECTION, |cp| {
            param_out_usize(cp, "num_pools", self.pools.len());
            for (i, pool) in self.pools.iter().enumerate() {
                pool.serialize_section(cp, &format!("pool{}", i));
            }
        });
    }

    /// Drop the current pools and rebuild them from the `mempools` section
    ///
    /// Pools are rebuilt in saved order, so ids match the saved set. If a
    /// pool section is invalid the set is left empty.
    pub fn unserialize<C: CheckpointIn + ?Sized>(&mut self, cp: &mut C) -> AllocResult {
        // Delete previous pools
        self.pools.clear();

        let pools = with_section(cp, Self::SECTION, |cp| {
            let num_pools = param_in_usize(&*cp, "num_pools")?;
            let mut pools = Vec::new();
            for i in 0..num_pools {
                pools.push(PagePool::unserialize_section(cp, &format!("pool{}", i))?);
            }
            Ok::<_, AllocError>(pools)
        })?;
        self.pools = pools;

        info!("pool set: restored {} pools", self.pools.len());
        Ok(())
    }

    /// Print all pool information and block distribution
    pub fn print_pool_info(&self) {
        info!("========== Page Pools Info ==========");
        info!("Total pools: {}", self.pools.len());
        info!("Page shift: {}", self.page_shift);

        for (i, pool) in self.pools.iter().enumerate() {
            info!("Pool {}:", i);
            info!(
                "  Address range: [{:#x}, {:#x})",
                pool.start_addr(),
                pool.end_addr()
            );
            info!(
                "  Total pages: {} ({} usable)",
                pool.total_pages(),
                pool.usable_pages()
            );
            info!("  Free pages: {}", pool.free_pages());
            info!("  Free blocks distribution:");

            for order in 0..=MAX_ORDER {
                let block_count = pool.buddy().block_count(order);
                if block_count > 0 {
                    info!(
                        "    Order {}: {} blocks ({} pages each)",
                        order,
                        block_count,
                        1usize << order
                    );
                }
            }
        }
        info!("=====================================");
    }

    /// Print detailed allocation failure statistics
    #[cfg(feature = "tracking")]
    pub fn print_alloc_failure_stats(&self, pool_id: usize, num_pages: usize) {
        let pool_infos: Vec<_> = self
            .pools
            .iter()
            .enumerate()
            .map(|(i, pool)| pool.info(i))
            .collect();
        let pool_stats: Vec<_> = self.pools.iter().map(PagePool::stats).collect();

        crate::buddy::MemoryStatsReporter::print_alloc_failure_stats(
            1 << self.page_shift,
            &self.stats(),
            &pool_infos,
            &pool_stats,
            pool_id,
            num_pages,
        );
    }

    #[cfg(not(feature = "tracking"))]
    pub fn print_alloc_failure_stats(&self, _pool_id: usize, _num_pages: usize) {
        // No-op when tracking is disabled
    }
}

impl Default for PoolSet {
    fn default() -> Self {
        Self::new(crate::DEFAULT_PAGE_SHIFT)
    }
}
