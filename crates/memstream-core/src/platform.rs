//! Interfaces to the platform services memstream relies on.
//!
//! The measurement logic never touches physical memory management directly.
//! Instead, a platform provides:
//!
//! - a [`PhysMemoryMap`] describing the physical pages,
//! - a [`BlockClaimer`] handing out exclusive [`BackingStorage`] for a block,
//! - a [`CacheFlush`] implementation (default: [`Clflush`]),
//! - a [`Clock`] (default: [`MonotonicRawClock`]).

use crate::util::{CL_SIZE, PAGE_SHIFT, Size};
use serde::Serialize;
use std::arch::x86_64::{_mm_clflush, _mm_mfence};
use std::fmt;
use std::ops::Range;

/// Platform-defined identifier of a memory-management zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ZoneId(pub usize);

/// Description of an online physical page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageDesc {
    /// Zone the page belongs to
    pub zone: ZoneId,
    /// Page is excluded from allocation (firmware, holes, early allocations)
    pub reserved: bool,
}

/// Physical memory layout as seen by the memory manager.
///
/// All addresses are page frame numbers (PFNs).
pub trait PhysMemoryMap {
    /// Granularity of the blocks that can be claimed, in pages.
    fn block_pages(&self) -> u64;

    /// End PFN (exclusive) of every online memory node.
    fn node_end_pfns(&self) -> Vec<u64>;

    /// Returns the descriptor of `pfn` if the page exists and is online.
    fn online_page(&self, pfn: u64) -> Option<PageDesc>;

    /// Returns `true` if the declared span of `zone` contains `pfn`.
    fn zone_spans_pfn(&self, zone: ZoneId, pfn: u64) -> bool;
}

/// Maximum end PFN across all online nodes, `0` if there are none.
pub fn discover_max_pfn<M: PhysMemoryMap + ?Sized>(map: &M) -> u64 {
    map.node_end_pfns().into_iter().max().unwrap_or(0)
}

/// A block of physical memory, aligned to and spanning the block granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryBlock {
    start_pfn: u64,
    nr_pages: u64,
}

impl MemoryBlock {
    /// Creates the block of `nr_pages` pages starting at `start_pfn`.
    ///
    /// # Panics
    ///
    /// Panics if `nr_pages` is zero or `start_pfn` is not a multiple of it.
    pub fn new(start_pfn: u64, nr_pages: u64) -> Self {
        assert!(nr_pages > 0, "block must span at least one page");
        assert!(
            start_pfn.is_multiple_of(nr_pages),
            "PFN {:#x} is not aligned to {} pages",
            start_pfn,
            nr_pages
        );
        MemoryBlock {
            start_pfn,
            nr_pages,
        }
    }

    /// First PFN of the block.
    pub fn start_pfn(&self) -> u64 {
        self.start_pfn
    }

    /// Number of pages in the block.
    pub fn nr_pages(&self) -> u64 {
        self.nr_pages
    }

    /// PFNs covered by the block.
    pub fn pfns(&self) -> Range<u64> {
        self.start_pfn..self.start_pfn + self.nr_pages
    }

    /// Block size.
    pub fn size(&self) -> Size {
        Size::from_pages(self.nr_pages)
    }

    /// Physical address of the first byte.
    pub fn phys_start(&self) -> u64 {
        self.start_pfn << PAGE_SHIFT
    }

    /// Physical address of the last byte.
    pub fn phys_last(&self) -> u64 {
        ((self.start_pfn + self.nr_pages) << PAGE_SHIFT) - 1
    }
}

impl fmt::Display for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:016x} - 0x{:016x}]", self.phys_start(), self.phys_last())
    }
}

/// Memory handed out by a [`BlockClaimer`] for one claimed block.
///
/// # Safety
///
/// Implementors guarantee that [`ptr`](BackingStorage::ptr) is aligned to at
/// least 8 bytes and valid for reads and writes of [`len`](BackingStorage::len)
/// bytes for as long as the value lives, and that nothing else accesses that
/// memory in the meantime.
#[allow(clippy::len_without_is_empty)]
pub unsafe trait BackingStorage {
    /// Returns a mutable pointer to the start of the storage.
    fn ptr(&self) -> *mut u8;

    /// Returns the length of the storage in bytes.
    fn len(&self) -> usize;
}

/// Trait for platforms that can exclusively claim physical memory blocks.
///
/// A claim fails when the block is in use, not migratable or the platform is
/// out of resources. These failures are expected while scanning and are not
/// fatal.
///
/// # Associated Types
///
/// * `Storage` - Mapping of the claimed block.
/// * `Error` - The error type returned by failed claims.
pub trait BlockClaimer {
    /// Mapping of a claimed block.
    type Storage: BackingStorage;
    /// The error type returned by claim operations.
    type Error: std::error::Error;

    /// Claims `block` exclusively.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is in use, cannot be migrated, or the
    /// platform fails to map it.
    fn claim(&mut self, block: MemoryBlock) -> Result<Self::Storage, Self::Error>;

    /// Gives a previously claimed block back. Consumes the storage, so every
    /// successful claim is released exactly once.
    fn release(&mut self, block: MemoryBlock, storage: Self::Storage);
}

/// Evicts memory from all cache levels.
pub trait CacheFlush {
    /// Flushes every cache line of `data` and returns once the eviction is complete.
    fn flush_range(&self, data: &[u64]);
}

/// Cache flush using `clflush` followed by a full memory fence.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clflush;

impl CacheFlush for Clflush {
    fn flush_range(&self, data: &[u64]) {
        if data.is_empty() {
            return;
        }
        let start = data.as_ptr() as usize & !(CL_SIZE - 1);
        let end = data.as_ptr_range().end as usize;
        for line in (start..end).step_by(CL_SIZE) {
            // every line in range overlaps `data`, which is mapped
            unsafe { _mm_clflush(line as *const u8) };
        }
        unsafe { _mm_mfence() };
    }
}

/// Monotonic nanosecond timestamp source.
pub trait Clock {
    /// Current timestamp in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// `CLOCK_MONOTONIC_RAW`, unaffected by NTP slewing.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicRawClock;

impl Clock for MonotonicRawClock {
    fn now_ns(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) };
        assert_eq!(
            ret,
            0,
            "clock_gettime: {}",
            std::io::Error::last_os_error()
        );
        ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
    }
}
