use crate::sysfs::{read_block, set_state};
use crate::{LinuxPaths, LinuxPlatformError};
use log::{debug, warn};
use memmap2::{MmapMut, MmapOptions};
use memstream_core::platform::{BackingStorage, BlockClaimer, MemoryBlock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

/// Physical memory of a claimed block, mapped through `/dev/mem`.
pub struct DevMemStorage {
    _map: MmapMut,
    ptr: *mut u8,
    len: usize,
}

// the mapping is page-aligned and the block is offline, so nothing else uses it
unsafe impl BackingStorage for DevMemStorage {
    fn ptr(&self) -> *mut u8 {
        self.ptr
    }
    fn len(&self) -> usize {
        self.len
    }
}

/// Claims blocks by offlining them through memory hotplug.
///
/// Offlining migrates every movable page out of the block and fails if a page
/// cannot be migrated, which is exactly the exclusivity a claim requires.
pub struct LinuxClaimer {
    memory: PathBuf,
    hotplug_pages: u64,
    dev_mem: File,
    /// State to restore per hotplug block index, for every held claim
    held: BTreeMap<u64, Vec<(u64, &'static str)>>,
}

impl LinuxClaimer {
    /// Opens `/dev/mem`.
    ///
    /// `hotplug_pages` is the size of a hotplug memory block in pages.
    ///
    /// # Errors
    ///
    /// Returns an error if `/dev/mem` cannot be opened for reading and writing.
    pub fn open(paths: &LinuxPaths, hotplug_pages: u64) -> Result<Self, LinuxPlatformError> {
        assert!(hotplug_pages > 0, "hotplug block size must not be zero");
        let dev_mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&paths.dev_mem)
            .map_err(LinuxPlatformError::io(&paths.dev_mem))?;
        Ok(LinuxClaimer {
            memory: paths.memory.clone(),
            hotplug_pages,
            dev_mem,
            held: BTreeMap::new(),
        })
    }

    fn restore(&self, offlined: &[(u64, &'static str)]) {
        for &(index, state) in offlined {
            if let Err(e) = set_state(&self.memory, index, state) {
                warn!("{}", e);
            }
        }
    }

    fn offline(&self, block: MemoryBlock) -> Result<Vec<(u64, &'static str)>, LinuxPlatformError> {
        let first = block.start_pfn() / self.hotplug_pages;
        let last = (block.pfns().end - 1) / self.hotplug_pages;
        let mut offlined = vec![];
        for index in first..=last {
            let restore = read_block(&self.memory, index)
                .and_then(|state| {
                    state.ok_or_else(|| LinuxPlatformError::State {
                        index,
                        state: "offline",
                        source: std::io::ErrorKind::NotFound.into(),
                    })
                })
                .map(|state| state.online_state())
                .and_then(|restore| set_state(&self.memory, index, "offline").map(|_| restore));
            match restore {
                Ok(restore) => offlined.push((index, restore)),
                Err(e) => {
                    self.restore(&offlined);
                    return Err(e);
                }
            }
        }
        Ok(offlined)
    }
}

impl BlockClaimer for LinuxClaimer {
    type Storage = DevMemStorage;
    type Error = LinuxPlatformError;

    fn claim(&mut self, block: MemoryBlock) -> Result<DevMemStorage, LinuxPlatformError> {
        let offlined = self.offline(block)?;
        let len = block.size().bytes();
        let map = unsafe {
            MmapOptions::new()
                .offset(block.phys_start())
                .len(len)
                .map_mut(&self.dev_mem)
        };
        let mut map = match map {
            Ok(map) => map,
            Err(source) => {
                self.restore(&offlined);
                return Err(LinuxPlatformError::Map { block, source });
            }
        };
        debug!("Claimed {} at {:p}", block, map.as_ptr());
        self.held.insert(block.start_pfn(), offlined);
        let ptr = map.as_mut_ptr();
        Ok(DevMemStorage {
            _map: map,
            ptr,
            len,
        })
    }

    fn release(&mut self, block: MemoryBlock, storage: DevMemStorage) {
        drop(storage);
        match self.held.remove(&block.start_pfn()) {
            Some(offlined) => self.restore(&offlined),
            None => warn!("Released {} which was never claimed", block),
        }
    }
}
