//! Measurement of a single claimed memory block.

use crate::kernel::{ACCESSES_PER_ELEMENT, ArrayName, WorkingArrays, run_cached, run_uncached};
use crate::platform::{BackingStorage, CacheFlush, Clflush, Clock, MemoryBlock, MonotonicRawClock};
use log::{debug, info};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors detected while measuring a block.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// An array element differs from its neighbours after the kernel runs.
    #[error("Mismatch detected for PFN {:#x} {block}: {array}[{index}] differs from {array}[0]", .block.start_pfn())]
    Mismatch {
        /// The measured block
        block: MemoryBlock,
        /// Array containing the deviating element
        array: ArrayName,
        /// Index of the first deviating element
        index: usize,
    },
    /// The claimer handed out less memory than the block spans.
    #[error("Storage for {block} holds {actual} bytes, expected {expected}")]
    StorageTooSmall {
        /// The measured block
        block: MemoryBlock,
        /// Block size in bytes
        expected: usize,
        /// Storage size in bytes
        actual: usize,
    },
}

impl ExperimentError {
    /// The block the error refers to.
    pub fn block(&self) -> MemoryBlock {
        match self {
            ExperimentError::Mismatch { block, .. } => *block,
            ExperimentError::StorageTooSmall { block, .. } => *block,
        }
    }
}

impl Serialize for ExperimentError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Bandwidth figures of one block.
#[derive(Clone, Debug, Serialize)]
pub struct ExperimentResult {
    /// The measured block
    pub block: MemoryBlock,
    /// Elements per array
    pub elements: usize,
    /// Best iteration of the cache-primed kernel, in nanoseconds
    pub cached_ns: u64,
    /// Best iteration of the cache-flushed kernel, in nanoseconds
    pub uncached_ns: u64,
    /// Cache-primed bandwidth in MB/s
    pub cached_mb_s: u64,
    /// Cache-flushed bandwidth in MB/s
    pub uncached_mb_s: u64,
    /// Ratio of cache-primed to cache-flushed bandwidth, `None` if undefined
    pub cache_ratio: Option<f64>,
}

impl ExperimentResult {
    /// Builds the result and derives the bandwidth figures.
    pub fn new(block: MemoryBlock, elements: usize, cached_ns: u64, uncached_ns: u64) -> Self {
        let accessed = accessed_bytes(elements);
        let cached = bytes_per_s(accessed, cached_ns);
        let uncached = bytes_per_s(accessed, uncached_ns);
        ExperimentResult {
            block,
            elements,
            cached_ns,
            uncached_ns,
            cached_mb_s: mb_per_s(accessed, cached_ns),
            uncached_mb_s: mb_per_s(accessed, uncached_ns),
            cache_ratio: (uncached > 0.0).then(|| cached / uncached),
        }
    }

    /// Bytes moved by one kernel iteration.
    pub fn accessed_bytes(&self) -> u64 {
        accessed_bytes(self.elements)
    }

    /// Cache-primed bandwidth in bytes per second.
    pub fn cached_bandwidth(&self) -> f64 {
        bytes_per_s(self.accessed_bytes(), self.cached_ns)
    }

    /// Cache-flushed bandwidth in bytes per second.
    pub fn uncached_bandwidth(&self) -> f64 {
        bytes_per_s(self.accessed_bytes(), self.uncached_ns)
    }
}

fn accessed_bytes(elements: usize) -> u64 {
    ACCESSES_PER_ELEMENT * size_of::<u64>() as u64 * elements as u64
}

/// Bytes per microsecond, which is decimal MB/s. Zero durations yield zero.
fn mb_per_s(bytes: u64, ns: u64) -> u64 {
    match ns {
        0 => 0,
        ns => (bytes as u128 * 1000 / ns as u128) as u64,
    }
}

fn bytes_per_s(bytes: u64, ns: u64) -> f64 {
    match ns {
        0 => 0.0,
        ns => bytes as f64 * 1e9 / ns as f64,
    }
}

/// Measures one claimed block.
///
/// Seeds the three working arrays, runs the cache-primed and then the
/// cache-flushed kernel over the continued array state, verifies that every
/// array is uniform and reports both bandwidth figures.
pub struct BlockExperiment {
    clock: Box<dyn Clock + Send>,
    flush: Box<dyn CacheFlush + Send>,
}

impl Default for BlockExperiment {
    fn default() -> Self {
        BlockExperiment::new(MonotonicRawClock, Clflush)
    }
}

impl BlockExperiment {
    /// Creates an experiment using the given time source and cache flush.
    pub fn new(clock: impl Clock + Send + 'static, flush: impl CacheFlush + Send + 'static) -> Self {
        BlockExperiment {
            clock: Box::new(clock),
            flush: Box::new(flush),
        }
    }

    /// Runs the experiment on `block`, backed by `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Mismatch`] if the arrays are not uniform after
    /// both kernel runs, or [`ExperimentError::StorageTooSmall`] if `storage`
    /// does not cover the block.
    pub fn run<S: BackingStorage + ?Sized>(
        &self,
        block: MemoryBlock,
        storage: &mut S,
    ) -> Result<ExperimentResult, ExperimentError> {
        let block_bytes = block.size().bytes();
        if storage.len() < block_bytes {
            return Err(ExperimentError::StorageTooSmall {
                block,
                expected: block_bytes,
                actual: storage.len(),
            });
        }
        let mut arrays = WorkingArrays::carve(storage, block_bytes);
        debug!("{}: {} elements per array", block, arrays.len());

        arrays.seed();
        let cached = run_cached(&mut arrays, self.clock.as_ref());
        let uncached = run_uncached(&mut arrays, self.clock.as_ref(), self.flush.as_ref());

        if let Some((array, index)) = arrays.find_mismatch() {
            return Err(ExperimentError::Mismatch {
                block,
                array,
                index,
            });
        }

        let result = ExperimentResult::new(
            block,
            arrays.len(),
            cached.as_nanos() as u64,
            uncached.as_nanos() as u64,
        );
        info!(
            "{} {} MB/s / {} MB/s",
            block, result.uncached_mb_s, result.cached_mb_s
        );
        if let Some(ratio) = result.cache_ratio {
            debug!("{}: cached/uncached ratio {:.2}", block, ratio);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::array_len;
    use crate::test_util::{CorruptingFlush, NoFlush, ScriptedClock, VecStorage};
    use crate::util::MAX_ORDER_NR_PAGES;

    fn block(pages: u64) -> MemoryBlock {
        MemoryBlock::new(0, pages)
    }

    #[test]
    fn measures_block() -> anyhow::Result<()> {
        let block = block(16);
        let mut storage = VecStorage::new(block.size().bytes());
        let experiment = BlockExperiment::new(ScriptedClock::constant(1000), NoFlush);
        let result = experiment.run(block, &mut storage)?;
        let n = array_len(16 * 4096);
        assert_eq!(result.elements, n);
        assert_eq!(result.cached_ns, 1000);
        // four individually timed phases
        assert_eq!(result.uncached_ns, 4000);
        assert_eq!(result.accessed_bytes(), 80 * n as u64);
        assert_eq!(result.cached_mb_s, 80 * n as u64);
        assert_eq!(result.uncached_mb_s, 20 * n as u64);
        let ratio = result.cache_ratio.expect("ratio");
        assert!((ratio - 4.0).abs() < 1e-9);
        let json = serde_json::to_value(&result)?;
        assert!(json["cache_ratio"].as_f64().is_some_and(|r| (r - 4.0).abs() < 1e-9));
        Ok(())
    }

    #[test]
    fn real_clock_and_flush() -> anyhow::Result<()> {
        let block = block(MAX_ORDER_NR_PAGES / 16);
        let mut storage = VecStorage::new(block.size().bytes());
        let result = BlockExperiment::default().run(block, &mut storage)?;
        assert!(result.cached_ns > 0);
        assert!(result.uncached_ns > 0);
        assert!(result.cached_bandwidth() > 0.0);
        Ok(())
    }

    #[test]
    fn corrupted_element_is_a_mismatch() {
        let block = block(4);
        let mut storage = VecStorage::new(block.size().bytes());
        // the last flush precedes the final triad and hands over `c`
        let flush = CorruptingFlush::new(CorruptingFlush::calls_per_run());
        let err = BlockExperiment::new(ScriptedClock::constant(100), flush)
            .run(block, &mut storage)
            .unwrap_err();
        let last = array_len(block.size().bytes()) - 1;
        assert!(
            matches!(
                err,
                ExperimentError::Mismatch {
                    array: ArrayName::A,
                    index,
                    ..
                } if index == last
            ),
            "{err}"
        );
        assert_eq!(err.block(), block);
    }

    #[test]
    fn storage_too_small() {
        let block = block(4);
        let mut storage = VecStorage::new(4096);
        let err = BlockExperiment::new(ScriptedClock::constant(1), NoFlush)
            .run(block, &mut storage)
            .unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::StorageTooSmall {
                expected: 16384,
                actual: 4096,
                ..
            }
        ));
        assert_eq!(err.block(), block);
    }

    #[test]
    fn zero_duration_reports_zero_bandwidth() {
        let result = ExperimentResult::new(block(1), 100, 0, 0);
        assert_eq!(result.cached_mb_s, 0);
        assert_eq!(result.uncached_bandwidth(), 0.0);
        assert_eq!(result.cache_ratio, None);
    }

    #[test]
    fn mismatch_message_names_block() {
        let err = ExperimentError::Mismatch {
            block: MemoryBlock::new(0x400, 0x400),
            array: ArrayName::C,
            index: 17,
        };
        let msg = err.to_string();
        assert!(msg.contains("PFN 0x400"), "{msg}");
        assert!(msg.contains("c[17]"), "{msg}");
        assert_eq!(serde_json::to_value(&err).unwrap(), serde_json::Value::String(msg));
    }
}
