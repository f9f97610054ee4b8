use crate::kpageflags::{KPF_RESERVED, has_flag, read_flags};
use crate::sysfs::{HotplugBlock, read_block, read_block_size};
use crate::zoneinfo::{ZoneSpan, node_ends, parse_zoneinfo};
use crate::{LinuxPaths, LinuxPlatformError};
use log::{info, trace, warn};
use memstream_core::platform::{PageDesc, PhysMemoryMap, ZoneId};
use memstream_core::util::PAGE_SIZE;
use std::cell::RefCell;
use std::fs::{self, File};
use std::path::PathBuf;

struct CachedBlock {
    index: u64,
    pages: Option<(ZoneId, Vec<u64>)>,
}

/// Physical memory map of the running kernel.
///
/// Page state is read one hotplug block at a time and cached until a page of
/// another block is queried. Zone `i` of [`zones`](LinuxMemoryMap::zones) is
/// reported as `ZoneId(i)`.
pub struct LinuxMemoryMap {
    memory: PathBuf,
    block_pages: u64,
    zones: Vec<ZoneSpan>,
    kpageflags: File,
    cache: RefCell<Option<CachedBlock>>,
}

impl LinuxMemoryMap {
    /// Reads the block size and the zone layout.
    ///
    /// # Errors
    ///
    /// Returns an error if `block_size_bytes`, the zone statistics or the page
    /// flags cannot be read.
    pub fn open(paths: &LinuxPaths) -> Result<Self, LinuxPlatformError> {
        let block_bytes = read_block_size(&paths.memory)?;
        if !block_bytes.is_multiple_of(PAGE_SIZE as u64) {
            return Err(LinuxPlatformError::Parse {
                path: paths.memory.join("block_size_bytes"),
                content: format!("{:x}", block_bytes),
            });
        }
        let zoneinfo =
            fs::read_to_string(&paths.zoneinfo).map_err(LinuxPlatformError::io(&paths.zoneinfo))?;
        let zones = parse_zoneinfo(&zoneinfo);
        if zones.is_empty() {
            return Err(LinuxPlatformError::Parse {
                path: paths.zoneinfo.clone(),
                content: zoneinfo,
            });
        }
        let kpageflags =
            File::open(&paths.kpageflags).map_err(LinuxPlatformError::io(&paths.kpageflags))?;
        for zone in &zones {
            info!(
                "Node {} zone {:<8} PFNs {:#x}..{:#x}",
                zone.node,
                zone.name,
                zone.start_pfn,
                zone.pfns().end
            );
        }
        Ok(LinuxMemoryMap {
            memory: paths.memory.clone(),
            block_pages: block_bytes / PAGE_SIZE as u64,
            zones,
            kpageflags,
            cache: RefCell::new(None),
        })
    }

    /// Zones reported by the kernel.
    pub fn zones(&self) -> &[ZoneSpan] {
        &self.zones
    }

    fn zone_of(&self, block: &HotplugBlock, index: u64) -> Option<ZoneId> {
        let name = block.zone.as_deref()?;
        let pfns = index * self.block_pages..(index + 1) * self.block_pages;
        self.zones
            .iter()
            .position(|z| {
                z.name == name
                    && block.node.is_none_or(|node| node == z.node)
                    && z.start_pfn < pfns.end
                    && pfns.start < z.pfns().end
            })
            .map(ZoneId)
    }

    fn load(&self, index: u64) -> Option<(ZoneId, Vec<u64>)> {
        let block = match read_block(&self.memory, index) {
            Ok(Some(block)) => block,
            Ok(None) => {
                trace!("Memory block {} does not exist", index);
                return None;
            }
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        if !block.online {
            return None;
        }
        let zone = self.zone_of(&block, index)?;
        let start = index * self.block_pages;
        match read_flags(&self.kpageflags, start..start + self.block_pages) {
            Ok(flags) => Some((zone, flags)),
            Err(e) => {
                warn!("Failed to read page flags of memory block {}: {}", index, e);
                None
            }
        }
    }
}

impl PhysMemoryMap for LinuxMemoryMap {
    fn block_pages(&self) -> u64 {
        self.block_pages
    }

    fn node_end_pfns(&self) -> Vec<u64> {
        node_ends(&self.zones)
    }

    fn online_page(&self, pfn: u64) -> Option<PageDesc> {
        let index = pfn / self.block_pages;
        let mut cache = self.cache.borrow_mut();
        if cache.as_ref().is_none_or(|c| c.index != index) {
            *cache = Some(CachedBlock {
                index,
                pages: self.load(index),
            });
        }
        let (zone, flags) = cache.as_ref()?.pages.as_ref()?;
        let flags = flags[(pfn - index * self.block_pages) as usize];
        Some(PageDesc {
            zone: *zone,
            reserved: has_flag(flags, KPF_RESERVED),
        })
    }

    fn zone_spans_pfn(&self, zone: ZoneId, pfn: u64) -> bool {
        self.zones
            .get(zone.0)
            .is_some_and(|z| z.pfns().contains(&pfn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeSystem, PAGES_PER_BLOCK};
    use memstream_core::validator::is_block_valid;

    const G: u64 = PAGES_PER_BLOCK;

    fn system(name: &str) -> anyhow::Result<FakeSystem> {
        let sys = FakeSystem::new(name)?;
        sys.zoneinfo(&[(0, "DMA32", 0, 2 * G), (0, "Normal", 2 * G, 2 * G), (1, "Movable", 4 * G, 2 * G)])?;
        sys.memory_block(0, 0, true, "DMA32")?;
        sys.memory_block(1, 0, true, "DMA32")?;
        sys.memory_block(2, 0, true, "Normal")?;
        sys.memory_block(3, 0, false, "Normal Movable")?;
        sys.memory_block(5, 1, true, "Movable")?;
        let mut flags = vec![0u64; 6 * G as usize];
        flags[(G + 3) as usize] = 1 << KPF_RESERVED;
        flags[(2 * G) as usize] = 1 << KPF_RESERVED;
        sys.kpageflags(&flags)?;
        Ok(sys)
    }

    #[test]
    fn reads_layout() -> anyhow::Result<()> {
        let sys = system("layout")?;
        let map = LinuxMemoryMap::open(&sys.paths())?;
        assert_eq!(map.block_pages(), G);
        assert_eq!(map.zones().len(), 3);
        assert_eq!(map.node_end_pfns(), vec![4 * G, 6 * G]);
        assert!(map.zone_spans_pfn(ZoneId(2), 4 * G));
        assert!(!map.zone_spans_pfn(ZoneId(2), 4 * G - 1));
        assert!(!map.zone_spans_pfn(ZoneId(7), 0));
        Ok(())
    }

    #[test]
    fn page_state() -> anyhow::Result<()> {
        let sys = system("page-state")?;
        let map = LinuxMemoryMap::open(&sys.paths())?;
        assert_eq!(
            map.online_page(1),
            Some(PageDesc {
                zone: ZoneId(0),
                reserved: false
            })
        );
        assert_eq!(map.online_page(G + 3).map(|p| p.reserved), Some(true));
        assert_eq!(map.online_page(2 * G + 1).map(|p| p.zone), Some(ZoneId(1)));
        // offline block
        assert_eq!(map.online_page(3 * G), None);
        // missing block
        assert_eq!(map.online_page(4 * G), None);
        assert_eq!(map.online_page(5 * G).map(|p| p.zone), Some(ZoneId(2)));
        Ok(())
    }

    #[test]
    fn validates_blocks() -> anyhow::Result<()> {
        let sys = system("validate")?;
        let map = LinuxMemoryMap::open(&sys.paths())?;
        let valid = (0..6)
            .map(|b| b * G)
            .filter(|&pfn| is_block_valid(&map, pfn))
            .collect::<Vec<_>>();
        // block 1 has a reserved page, block 2 only on its first page
        assert_eq!(valid, vec![0, 2 * G, 5 * G]);
        Ok(())
    }

    #[test]
    fn missing_interfaces_fail() -> anyhow::Result<()> {
        let sys = system("missing")?;
        let mut paths = sys.paths();
        paths.kpageflags = sys.path("nonexistent");
        assert!(matches!(
            LinuxMemoryMap::open(&paths),
            Err(LinuxPlatformError::Io { .. })
        ));
        sys.write("zoneinfo", "")?;
        assert!(matches!(
            LinuxMemoryMap::open(&sys.paths()),
            Err(LinuxPlatformError::Parse { .. })
        ));
        Ok(())
    }
}
