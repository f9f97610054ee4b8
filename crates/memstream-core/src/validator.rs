//! Eligibility check for memory blocks.
//!
//! Claiming a physically contiguous range only works if the range lies in a
//! single zone and contains no reserved pages (memory holes, firmware and early
//! boot allocations). [`is_block_valid`] checks this for every page of a
//! candidate block before any claim is attempted.

use crate::platform::PhysMemoryMap;
use log::trace;

/// Returns `true` if the block starting at `start_pfn` may be claimed.
///
/// Every page in the block must be online, belong to the zone of the first
/// page, lie within that zone's span and not be reserved.
///
/// # Panics
///
/// Panics if `start_pfn` is not aligned to [`PhysMemoryMap::block_pages`].
pub fn is_block_valid<M: PhysMemoryMap + ?Sized>(map: &M, start_pfn: u64) -> bool {
    let nr_pages = map.block_pages();
    assert!(
        start_pfn.is_multiple_of(nr_pages),
        "PFN {:#x} is not aligned to the block size of {} pages",
        start_pfn,
        nr_pages
    );

    let Some(first) = map.online_page(start_pfn) else {
        trace!("PFN {:#x}: not online", start_pfn);
        return false;
    };
    let zone = first.zone;

    for pfn in start_pfn + 1..start_pfn + nr_pages {
        let Some(page) = map.online_page(pfn) else {
            trace!("PFN {:#x}: not online", pfn);
            return false;
        };
        if page.zone != zone {
            trace!("PFN {:#x}: zone {:?} != {:?}", pfn, page.zone, zone);
            return false;
        }
        if !map.zone_spans_pfn(zone, pfn) {
            trace!("PFN {:#x}: outside of zone {:?}", pfn, zone);
            return false;
        }
        if page.reserved {
            trace!("PFN {:#x}: reserved", pfn);
            return false;
        }
    }
    true
}
