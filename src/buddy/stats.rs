//! Statistics and debugging for buddy allocator
//!
//! Provides per-order block counts and failure reporting.

use crate::MAX_ORDER;

#[cfg(feature = "tracking")]
use crate::page_pool::PoolInfo;

/// Buddy system statistics, in pages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuddyStats {
    pub total_pages: usize,
    /// Pages covered by order blocks; the tail past the last full block is never usable
    pub usable_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    pub free_blocks_by_order: [usize; MAX_ORDER + 1],
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            total_pages: 0,
            usable_pages: 0,
            free_pages: 0,
            used_pages: 0,
            free_blocks_by_order: [0; MAX_ORDER + 1],
        }
    }

    /// Add statistics from another BuddyStats
    pub fn add(&mut self, other: &BuddyStats) {
        self.total_pages += other.total_pages;
        self.usable_pages += other.usable_pages;
        self.free_pages += other.free_pages;
        self.used_pages += other.used_pages;
        for (i, &count) in other.free_blocks_by_order.iter().enumerate() {
            self.free_blocks_by_order[i] += count;
        }
    }
}

/// Detailed memory statistics reporter
#[cfg(feature = "tracking")]
pub struct MemoryStatsReporter;

#[cfg(feature = "tracking")]
impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(
        page_size: usize,
        total_stats: &BuddyStats,
        pool_infos: &[PoolInfo],
        pool_stats: &[BuddyStats],
        pool_id: usize,
        request_pages: usize,
    ) {
        #[cfg(feature = "log")]
        use log::error;
        error!("========================================");
        error!(
            "Request: {} pages ({} KB) from pool {}",
            request_pages,
            (request_pages * page_size) / 1024,
            pool_id
        );

        error!("Overall Memory State:");
        error!("  Total pools: {}", pool_infos.len());
        error!(
            "  Total pages: {} ({} KB, {} usable)",
            total_stats.total_pages,
            (total_stats.total_pages * page_size) / 1024,
            total_stats.usable_pages
        );
        error!(
            "  Free pages: {} ({} KB)",
            total_stats.free_pages,
            (total_stats.free_pages * page_size) / 1024
        );
        error!(
            "  Used pages: {} ({} KB)",
            total_stats.used_pages,
            (total_stats.used_pages * page_size) / 1024
        );
        error!("========================================");

        for (info, stats) in pool_infos.iter().zip(pool_stats) {
            error!("Pool {}:", info.pool_id);
            error!("  Range: [{:#x}, {:#x})", info.start_addr, info.end_addr);
            error!("  Free pages: {} / {}", stats.free_pages, info.total_pages);
            error!("  Free blocks by order:");

            for order in (0..=MAX_ORDER).rev() {
                let count = stats.free_blocks_by_order[order];
                if count > 0 {
                    let block_size = (1 << order) * page_size;
                    error!(
                        "    Order {}: {} blocks ({} KB each, {} KB total)",
                        order,
                        count,
                        block_size / 1024,
                        (count * block_size) / 1024
                    );
                }
            }
            error!("----------------------------------------");
        }

        error!("========================================");
    }
}
