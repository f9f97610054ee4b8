//! Test doubles for the platform traits.

use crate::kernel::{ITERATIONS, Phase};
use crate::platform::{
    BackingStorage, BlockClaimer, CacheFlush, Clock, MemoryBlock, PageDesc, PhysMemoryMap, ZoneId,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::ops::Range;

/// Heap memory posing as a claimed block.
pub struct VecStorage {
    _data: Vec<u64>,
    ptr: *mut u64,
    len: usize,
}

impl VecStorage {
    pub fn new(bytes: usize) -> Self {
        let mut data = vec![0u64; bytes.div_ceil(8)];
        let ptr = data.as_mut_ptr();
        VecStorage {
            _data: data,
            ptr,
            len: bytes,
        }
    }
}

unsafe impl BackingStorage for VecStorage {
    fn ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }
    fn len(&self) -> usize {
        self.len
    }
}

/// Clock advancing by scripted span durations.
///
/// Calls alternate between span start and span end; the n-th span lasts
/// `durations[n % len]` nanoseconds.
pub struct ScriptedClock {
    durations: Vec<u64>,
    now: Cell<u64>,
    calls: Cell<usize>,
}

impl ScriptedClock {
    pub fn new(durations: &[u64]) -> Self {
        assert!(!durations.is_empty());
        ScriptedClock {
            durations: durations.to_vec(),
            now: Cell::new(1_000),
            calls: Cell::new(0),
        }
    }

    pub fn constant(duration: u64) -> Self {
        Self::new(&[duration])
    }

    pub fn spans(&self) -> usize {
        self.calls.get() / 2
    }
}

impl Clock for ScriptedClock {
    fn now_ns(&self) -> u64 {
        let call = self.calls.get();
        self.calls.set(call + 1);
        let step = if call % 2 == 1 {
            self.durations[(call / 2) % self.durations.len()]
        } else {
            13
        };
        self.now.set(self.now.get() + step);
        self.now.get()
    }
}

pub struct NoFlush;

impl CacheFlush for NoFlush {
    fn flush_range(&self, _data: &[u64]) {}
}

/// Records `(address, elements)` of every flushed range.
#[derive(Default)]
pub struct RecordingFlush {
    flushed: RefCell<Vec<(usize, usize)>>,
}

impl RecordingFlush {
    pub fn flushed(&self) -> Vec<(usize, usize)> {
        self.flushed.borrow().clone()
    }
}

impl CacheFlush for RecordingFlush {
    fn flush_range(&self, data: &[u64]) {
        self.flushed
            .borrow_mut()
            .push((data.as_ptr() as usize, data.len()));
    }
}

/// Flips the last element of the range passed to the `at_call`-th flush
/// (counting from 1). Later calls are plain no-ops.
pub struct CorruptingFlush {
    at_call: usize,
    calls: Cell<usize>,
}

impl CorruptingFlush {
    pub fn new(at_call: usize) -> Self {
        CorruptingFlush {
            at_call,
            calls: Cell::new(0),
        }
    }

    /// Flush calls made by one uncached run.
    pub fn calls_per_run() -> usize {
        Phase::ALL.iter().map(|p| p.touches().len()).sum::<usize>() * ITERATIONS
    }
}

impl CacheFlush for CorruptingFlush {
    fn flush_range(&self, data: &[u64]) {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if call != self.at_call {
            return;
        }
        if let Some(last) = data.last() {
            // emulates a faulty cell changing under the kernel
            let ptr = last as *const u64 as *mut u64;
            unsafe { ptr.write_volatile(!*last) };
        }
    }
}

/// Page table with one entry per PFN.
pub struct TableMap {
    pub block_pages: u64,
    pub pages: Vec<Option<PageDesc>>,
    pub zones: Vec<Range<u64>>,
    pub node_ends: Vec<u64>,
}

impl TableMap {
    /// `blocks` blocks of online, unreserved pages in a single zone on one node.
    pub fn uniform(blocks: u64, block_pages: u64) -> Self {
        let total = blocks * block_pages;
        TableMap {
            block_pages,
            pages: vec![
                Some(PageDesc {
                    zone: ZoneId(0),
                    reserved: false,
                });
                total as usize
            ],
            zones: vec![0..total],
            node_ends: vec![total],
        }
    }

    pub fn set_reserved(&mut self, pfn: u64) {
        if let Some(page) = self.pages[pfn as usize].as_mut() {
            page.reserved = true;
        }
    }

    pub fn set_zone(&mut self, pfn: u64, zone: ZoneId) {
        if let Some(page) = self.pages[pfn as usize].as_mut() {
            page.zone = zone;
        }
    }
}

impl PhysMemoryMap for TableMap {
    fn block_pages(&self) -> u64 {
        self.block_pages
    }

    fn node_end_pfns(&self) -> Vec<u64> {
        self.node_ends.clone()
    }

    fn online_page(&self, pfn: u64) -> Option<PageDesc> {
        self.pages.get(pfn as usize).copied().flatten()
    }

    fn zone_spans_pfn(&self, zone: ZoneId, pfn: u64) -> bool {
        self.zones.get(zone.0).is_some_and(|span| span.contains(&pfn))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("block {0} is busy")]
pub struct Busy(pub MemoryBlock);

/// Claimer handing out heap storage, failing for `busy` start PFNs.
#[derive(Default)]
pub struct TestClaimer {
    pub busy: BTreeSet<u64>,
    pub claimed: Vec<u64>,
    pub released: Vec<u64>,
}

impl BlockClaimer for TestClaimer {
    type Storage = VecStorage;
    type Error = Busy;

    fn claim(&mut self, block: MemoryBlock) -> Result<VecStorage, Busy> {
        if self.busy.contains(&block.start_pfn()) {
            return Err(Busy(block));
        }
        self.claimed.push(block.start_pfn());
        Ok(VecStorage::new(block.size().bytes()))
    }

    fn release(&mut self, block: MemoryBlock, storage: VecStorage) {
        assert_eq!(storage.len(), block.size().bytes());
        self.released.push(block.start_pfn());
    }
}
