use libc::{MAP_ANONYMOUS, MAP_POPULATE, MAP_PRIVATE};
use log::debug;
use memstream_core::platform::{BackingStorage, BlockClaimer, MemoryBlock};
use std::collections::BTreeSet;
use std::ptr::null_mut;
use thiserror::Error;

/// Anonymous mapping standing in for a claimed physical block.
///
/// The mapping is removed when the value is dropped.
#[derive(Debug)]
pub struct AnonStorage {
    ptr: *mut u8,
    len: usize,
}

impl AnonStorage {
    /// Maps `len` bytes of zeroed, populated anonymous memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if mmap fails.
    pub fn map(len: usize) -> Result<Self, std::io::Error> {
        let p = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_POPULATE,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(AnonStorage {
            ptr: p as *mut u8,
            len,
        })
    }
}

// mmap returns page-aligned memory that is exclusively owned by this value
unsafe impl BackingStorage for AnonStorage {
    fn ptr(&self) -> *mut u8 {
        self.ptr
    }
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for AnonStorage {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}

/// Errors returned when claiming a simulated block.
#[derive(Debug, Error)]
pub enum DummyClaimError {
    /// The block was configured as busy
    #[error("Block {0} is busy")]
    Busy(MemoryBlock),
    /// The block is still held by a previous claim
    #[error("Block {0} is already claimed")]
    AlreadyClaimed(MemoryBlock),
    /// The backing mapping could not be created
    #[error("Failed to map storage for {0}: {1}")]
    Io(MemoryBlock, #[source] std::io::Error),
}

/// Claimer for a [`DummyMemoryMap`](crate::DummyMemoryMap).
///
/// Claims of busy blocks fail; every other block is backed by a fresh
/// [`AnonStorage`] until it is released.
#[derive(Debug, Default)]
pub struct DummyClaimer {
    busy: BTreeSet<u64>,
    held: BTreeSet<u64>,
    claims: u64,
}

impl DummyClaimer {
    /// Creates a claimer rejecting the blocks starting at the PFNs in `busy`.
    pub fn new(busy: BTreeSet<u64>) -> Self {
        DummyClaimer {
            busy,
            held: BTreeSet::new(),
            claims: 0,
        }
    }

    /// Start PFNs of the busy blocks.
    pub fn busy(&self) -> &BTreeSet<u64> {
        &self.busy
    }

    /// Start PFNs of the blocks currently claimed.
    pub fn held(&self) -> &BTreeSet<u64> {
        &self.held
    }

    /// Number of successful claims so far.
    pub fn claims(&self) -> u64 {
        self.claims
    }
}

impl BlockClaimer for DummyClaimer {
    type Storage = AnonStorage;
    type Error = DummyClaimError;

    fn claim(&mut self, block: MemoryBlock) -> Result<AnonStorage, DummyClaimError> {
        let pfn = block.start_pfn();
        if self.busy.contains(&pfn) {
            return Err(DummyClaimError::Busy(block));
        }
        if self.held.contains(&pfn) {
            return Err(DummyClaimError::AlreadyClaimed(block));
        }
        let storage =
            AnonStorage::map(block.size().bytes()).map_err(|e| DummyClaimError::Io(block, e))?;
        debug!("Claimed {} at {:p}", block, storage.ptr);
        self.held.insert(pfn);
        self.claims += 1;
        Ok(storage)
    }

    fn release(&mut self, block: MemoryBlock, storage: AnonStorage) {
        self.held.remove(&block.start_pfn());
        drop(storage);
    }
}
