//! Parser for `/proc/zoneinfo`.
//!
//! ```text
//! Node 0, zone   Normal
//!   pages free     1234
//!         spanned  3932160
//!         present  3932160
//!   ...
//!   start_pfn:           1048576
//! ```

use itertools::Itertools;
use std::ops::Range;

/// Span of one zone as reported by the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneSpan {
    /// Node the zone belongs to
    pub node: usize,
    /// Zone name (`DMA`, `DMA32`, `Normal`, `Movable`, ...)
    pub name: String,
    /// First PFN of the zone
    pub start_pfn: u64,
    /// Number of pages spanned, including holes
    pub spanned: u64,
}

impl ZoneSpan {
    /// PFNs spanned by the zone.
    pub fn pfns(&self) -> Range<u64> {
        self.start_pfn..self.start_pfn + self.spanned
    }
}

fn parse_header(line: &str) -> Option<(usize, &str)> {
    let (node, zone) = line.strip_prefix("Node ")?.split_once(',')?;
    let name = zone.trim().strip_prefix("zone")?.trim();
    Some((node.trim().parse().ok()?, name))
}

fn parse_value(line: &str, key: &str) -> Option<u64> {
    let mut parts = line.split_whitespace();
    if parts.next()? != key {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Extracts every zone with a known start PFN and span. Zones missing either
/// value are skipped.
pub(crate) fn parse_zoneinfo(s: &str) -> Vec<ZoneSpan> {
    let mut zones = vec![];
    let mut current: Option<(usize, String, Option<u64>, Option<u64>)> = None;
    let mut finish = |zone: Option<(usize, String, Option<u64>, Option<u64>)>| {
        if let Some((node, name, Some(start_pfn), Some(spanned))) = zone {
            zones.push(ZoneSpan {
                node,
                name,
                start_pfn,
                spanned,
            });
        }
    };
    for line in s.lines() {
        if let Some((node, name)) = parse_header(line) {
            finish(current.take());
            current = Some((node, name.to_owned(), None, None));
            continue;
        }
        let Some((_, _, start_pfn, spanned)) = current.as_mut() else {
            continue;
        };
        if let Some(v) = parse_value(line, "start_pfn:") {
            *start_pfn = Some(v);
        } else if let Some(v) = parse_value(line, "spanned") {
            *spanned = Some(v);
        }
    }
    finish(current);
    zones
}

/// End PFN of every node, ordered by node id.
pub(crate) fn node_ends(zones: &[ZoneSpan]) -> Vec<u64> {
    zones
        .iter()
        .map(|z| (z.node, z.pfns().end))
        .into_grouping_map()
        .max()
        .into_iter()
        .sorted()
        .map(|(_, end)| end)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONEINFO: &str = "\
Node 0, zone      DMA
  per-node stats
      nr_inactive_anon 1234
  pages free     3840
        boost    0
        min      3
        spanned  4095
        present  3998
        managed  3840
  start_pfn:           1
Node 0, zone    DMA32
  pages free     400000
        spanned  1044480
        present  500000
  start_pfn:           4096
Node 0, zone   Normal
  pages free     0
        spanned  0
        present  0
  start_pfn:           0
Node 1, zone   Normal
  pages free     100
        spanned  2097152
  pagesets
    cpu: 0
              count: 0
  start_pfn:           1048576
Node 1, zone  Movable
  pages free     0
";

    #[test]
    fn parses_zones() {
        let zones = parse_zoneinfo(ZONEINFO);
        assert_eq!(zones.len(), 4);
        assert_eq!(
            zones[0],
            ZoneSpan {
                node: 0,
                name: "DMA".into(),
                start_pfn: 1,
                spanned: 4095
            }
        );
        assert_eq!(zones[1].pfns(), 4096..1048576);
        assert_eq!(zones[3].node, 1);
        assert_eq!(zones[3].pfns(), 1048576..3145728);
    }

    #[test]
    fn node_end_is_max_over_zones() {
        let zones = parse_zoneinfo(ZONEINFO);
        assert_eq!(node_ends(&zones), vec![1048576, 3145728]);
    }

    #[test]
    fn empty_input() {
        assert!(parse_zoneinfo("").is_empty());
        assert!(node_ends(&[]).is_empty());
    }
}
