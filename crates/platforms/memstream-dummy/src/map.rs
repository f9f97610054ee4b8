use crate::claimer::DummyClaimer;
use itertools::Itertools;
use log::{debug, info};
use memstream_core::platform::{PageDesc, PhysMemoryMap, ZoneId};
use memstream_core::util::{MAX_ORDER_NR_PAGES, PAGE_SIZE, Size};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// A simulated memory zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyZone {
    /// Node the zone belongs to
    pub node: usize,
    /// PFNs spanned by the zone
    pub pfns: Range<u64>,
}

/// Simulated physical memory map.
///
/// Zone `i` of the builder is reported as `ZoneId(i)`. Pages outside every
/// zone are offline.
#[derive(Debug)]
pub struct DummyMemoryMap {
    block_pages: u64,
    zones: Vec<DummyZone>,
    offline: BTreeSet<u64>,
    reserved: BTreeSet<u64>,
    foreign: BTreeMap<u64, ZoneId>,
}

impl DummyMemoryMap {
    /// The simulated zones.
    pub fn zones(&self) -> &[DummyZone] {
        &self.zones
    }
}

impl PhysMemoryMap for DummyMemoryMap {
    fn block_pages(&self) -> u64 {
        self.block_pages
    }

    fn node_end_pfns(&self) -> Vec<u64> {
        self.zones
            .iter()
            .map(|zone| (zone.node, zone.pfns.end))
            .into_grouping_map()
            .max()
            .into_iter()
            .sorted()
            .map(|(_, end)| end)
            .collect()
    }

    fn online_page(&self, pfn: u64) -> Option<PageDesc> {
        if self.offline.contains(&pfn) {
            return None;
        }
        let home = self.zones.iter().position(|z| z.pfns.contains(&pfn))?;
        Some(PageDesc {
            zone: self.foreign.get(&pfn).copied().unwrap_or(ZoneId(home)),
            reserved: self.reserved.contains(&pfn),
        })
    }

    fn zone_spans_pfn(&self, zone: ZoneId, pfn: u64) -> bool {
        self.zones
            .get(zone.0)
            .is_some_and(|z| z.pfns.contains(&pfn))
    }
}

/// Builder for a simulated platform.
///
/// # Example
///
/// ```
/// use memstream_dummy::DummyPlatformBuilder;
/// use memstream_core::platform::PhysMemoryMap;
///
/// let (map, _claimer) = DummyPlatformBuilder::new(16)
///     .zone(0, 0..64)
///     .zone(1, 64..128)
///     .reserved(17)
///     .busy_block(32)
///     .build();
/// assert_eq!(map.node_end_pfns(), vec![64, 128]);
/// ```
#[derive(Clone, Debug)]
pub struct DummyPlatformBuilder {
    block_pages: u64,
    zones: Vec<DummyZone>,
    offline: BTreeSet<u64>,
    reserved: BTreeSet<u64>,
    foreign: BTreeMap<u64, ZoneId>,
    busy: BTreeSet<u64>,
    busy_ratio: Option<(f64, u64)>,
}

impl Default for DummyPlatformBuilder {
    fn default() -> Self {
        DummyPlatformBuilder::new(MAX_ORDER_NR_PAGES)
    }
}

impl DummyPlatformBuilder {
    /// Creates an empty platform with blocks of `block_pages` pages.
    ///
    /// # Panics
    ///
    /// Panics if `block_pages` is zero.
    pub fn new(block_pages: u64) -> Self {
        assert!(block_pages > 0, "block granularity must not be zero");
        DummyPlatformBuilder {
            block_pages,
            zones: vec![],
            offline: BTreeSet::new(),
            reserved: BTreeSet::new(),
            foreign: BTreeMap::new(),
            busy: BTreeSet::new(),
            busy_ratio: None,
        }
    }

    /// A single zone on node 0 spanning `size` from PFN 0, with default block size.
    pub fn with_size(size: Size) -> Self {
        let pages = (size.bytes() / PAGE_SIZE) as u64;
        DummyPlatformBuilder::default().zone(0, 0..pages)
    }

    /// Adds a zone on `node`. It becomes `ZoneId(n)` for the n-th call.
    pub fn zone(mut self, node: usize, pfns: Range<u64>) -> Self {
        self.zones.push(DummyZone { node, pfns });
        self
    }

    /// Takes the pages in `pfns` offline.
    pub fn offline(mut self, pfns: Range<u64>) -> Self {
        self.offline.extend(pfns);
        self
    }

    /// Marks `pfn` as reserved.
    pub fn reserved(mut self, pfn: u64) -> Self {
        self.reserved.insert(pfn);
        self
    }

    /// Reports `pfn` as belonging to `zone` instead of the zone spanning it.
    pub fn foreign_zone(mut self, pfn: u64, zone: ZoneId) -> Self {
        self.foreign.insert(pfn, zone);
        self
    }

    /// Makes every claim of the block starting at `start_pfn` fail.
    pub fn busy_block(mut self, start_pfn: u64) -> Self {
        self.busy.insert(start_pfn);
        self
    }

    /// Marks each block as busy with probability `ratio`, drawn from a PRNG seeded with `seed`.
    ///
    /// The ratio is clamped to `[0, 1]`; NaN counts as zero.
    pub fn random_busy(mut self, ratio: f64, seed: u64) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        self.busy_ratio = Some((ratio, seed));
        self
    }

    /// Builds the memory map and the matching claimer.
    pub fn build(self) -> (DummyMemoryMap, DummyClaimer) {
        let mut busy = self.busy;
        if let Some((ratio, seed)) = self.busy_ratio {
            let mut rng = StdRng::seed_from_u64(seed);
            let max_pfn = self.zones.iter().map(|z| z.pfns.end).max().unwrap_or(0);
            for pfn in (0..max_pfn).step_by(self.block_pages as usize) {
                if rng.random_bool(ratio) {
                    debug!("Block at PFN {:#x} is busy", pfn);
                    busy.insert(pfn);
                }
            }
        }
        info!(
            "Simulating {} zones, block size {} pages, {} busy blocks",
            self.zones.len(),
            self.block_pages,
            busy.len()
        );
        let map = DummyMemoryMap {
            block_pages: self.block_pages,
            zones: self.zones,
            offline: self.offline,
            reserved: self.reserved,
            foreign: self.foreign,
        };
        (map, DummyClaimer::new(busy))
    }
}
