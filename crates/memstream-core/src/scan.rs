use crate::experiment::{BlockExperiment, ExperimentError, ExperimentResult};
use crate::platform::{BlockClaimer, MemoryBlock, PhysMemoryMap, discover_max_pfn};
use crate::util::{BlockProgress, CancelableJoinHandle, StopToken, spawn_cancelable};
use crate::validator::is_block_valid;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use itertools::{Itertools, MinMaxResult};
use log::{debug, error, info, trace};
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Lifecycle of the scan worker.
///
/// `Scanning` moves to `IdleWait` once the address space is exhausted, or
/// directly to `Stopped` if a stop is requested first. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ScanState {
    /// Walking the physical address space
    Scanning = 0,
    /// Address space exhausted, waiting for the stop request
    IdleWait = 1,
    /// Stop request observed
    Stopped = 2,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ScanState::Scanning,
            1 => ScanState::IdleWait,
            _ => ScanState::Stopped,
        }
    }
}

#[derive(Clone, Debug)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        SharedState(Arc::new(AtomicU8::new(ScanState::Scanning as u8)))
    }

    fn get(&self) -> ScanState {
        ScanState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ScanState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Configuration parameters for a scan.
#[derive(Clone, Debug, Default)]
pub struct ScanConfig {
    /// Restricts the scan to this PFN window (None = whole address space).
    /// The start is rounded down to the block granularity, the end is clamped
    /// to the detected maximum PFN.
    pub pfn_range: Option<Range<u64>>,
}

/// Errors that can occur when starting or stopping the scan worker.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The worker thread could not be created
    #[error("Failed to start scan worker: {0}")]
    Spawn(#[from] std::io::Error),
    /// The worker thread panicked
    #[error("Scan worker panicked")]
    WorkerPanicked,
}

/// Results of one pass over the address space.
#[derive(Debug, Serialize)]
pub struct ScanSummary {
    /// RFC 3339 timestamp of when the scan started
    pub date: String,
    /// Maximum PFN detected at startup
    pub max_pfn: u64,
    /// Block granularity in pages
    pub block_pages: u64,
    /// Candidate blocks visited
    pub blocks_total: u64,
    /// Blocks rejected by the validator
    pub skipped_invalid: u64,
    /// Valid blocks that could not be claimed
    pub claim_failed: u64,
    /// Blocks that passed the correctness check
    pub measured: u64,
    /// Blocks that failed the correctness check
    pub mismatches: u64,
    /// Claimed blocks whose storage did not cover the block
    pub storage_errors: u64,
    /// `true` if the scan reached the end of the address space
    pub completed: bool,
    /// Outcome of every measured block
    pub results: Vec<Result<ExperimentResult, ExperimentError>>,
}

impl ScanSummary {
    fn new(max_pfn: u64, block_pages: u64) -> Self {
        ScanSummary {
            date: chrono::Local::now().to_rfc3339(),
            max_pfn,
            block_pages,
            blocks_total: 0,
            skipped_invalid: 0,
            claim_failed: 0,
            measured: 0,
            mismatches: 0,
            storage_errors: 0,
            completed: false,
            results: vec![],
        }
    }

    /// Blocks with the lowest and highest cache-flushed bandwidth.
    pub fn extremes(&self) -> Option<(&ExperimentResult, &ExperimentResult)> {
        match self
            .results
            .iter()
            .flatten()
            .minmax_by_key(|r| r.uncached_mb_s)
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(r) => Some((r, r)),
            MinMaxResult::MinMax(min, max) => Some((min, max)),
        }
    }

    fn log(&self) {
        info!(
            "Scanned {} blocks: {} invalid, {} unclaimable, {} measured, {} mismatches, {} storage errors",
            self.blocks_total,
            self.skipped_invalid,
            self.claim_failed,
            self.measured,
            self.mismatches,
            self.storage_errors
        );
        if let Some((slowest, fastest)) = self.extremes() {
            info!(
                "Slowest block {} at {} MB/s (cache ratio {}), fastest block {} at {} MB/s (cache ratio {})",
                slowest.block,
                slowest.uncached_mb_s,
                fmt_ratio(slowest.cache_ratio),
                fastest.block,
                fastest.uncached_mb_s,
                fmt_ratio(fastest.cache_ratio)
            );
        }
    }
}

fn fmt_ratio(ratio: Option<f64>) -> String {
    ratio.map_or_else(|| "n/a".to_string(), |r| format!("{:.2}", r))
}

/// Walks the physical address space and measures every claimable block.
///
/// The maximum PFN is detected once, when the driver is created. Blocks are
/// measured strictly one at a time: each block is claimed, measured and
/// released before the next candidate is looked at.
///
/// # Type Parameters
///
/// * `M` - Physical memory map used to validate candidates
/// * `C` - Claimer used to acquire and release blocks
pub struct ScanDriver<M: PhysMemoryMap, C: BlockClaimer> {
    map: M,
    claimer: C,
    experiment: BlockExperiment,
    block_pages: u64,
    max_pfn: u64,
    config: ScanConfig,
    progress: Option<MultiProgress>,
    state: SharedState,
}

impl<M: PhysMemoryMap, C: BlockClaimer> ScanDriver<M, C> {
    /// Creates a driver and detects the maximum PFN.
    ///
    /// # Panics
    ///
    /// Panics if the map reports a block granularity of zero pages.
    pub fn new(map: M, claimer: C) -> Self {
        let block_pages = map.block_pages();
        assert!(block_pages > 0, "block granularity must not be zero");
        let max_pfn = discover_max_pfn(&map);
        info!(
            "Detected max PFN {:#x}, block size {} pages",
            max_pfn, block_pages
        );
        ScanDriver {
            map,
            claimer,
            experiment: BlockExperiment::default(),
            block_pages,
            max_pfn,
            config: ScanConfig::default(),
            progress: None,
            state: SharedState::new(),
        }
    }

    /// Replaces the default experiment (raw monotonic clock, `clflush`).
    pub fn experiment(mut self, experiment: BlockExperiment) -> Self {
        self.experiment = experiment;
        self
    }

    /// Sets the scan configuration.
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Shows a progress bar over the candidate blocks.
    pub fn progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Maximum PFN detected at startup.
    pub fn max_pfn(&self) -> u64 {
        self.max_pfn
    }

    /// Block granularity in pages.
    pub fn block_pages(&self) -> u64 {
        self.block_pages
    }

    /// Current state of the state machine.
    pub fn state(&self) -> ScanState {
        self.state.get()
    }

    /// The claimer, e.g. to inspect it after a scan.
    pub fn claimer(&self) -> &C {
        &self.claimer
    }

    /// Start PFNs of all candidate blocks.
    pub fn candidates(&self) -> impl Iterator<Item = u64> + use<M, C> {
        let window = self.config.pfn_range.clone().unwrap_or(0..self.max_pfn);
        let start = window.start - window.start % self.block_pages;
        let end = window.end.min(self.max_pfn);
        (start..end.max(start)).step_by(self.block_pages as usize)
    }

    /// Scans the address space once.
    ///
    /// Returns when the address space is exhausted (state `IdleWait`) or as
    /// soon as `stop` is observed at the top of a step (state `Stopped`). A
    /// measurement in progress is never interrupted.
    pub fn scan(&mut self, stop: &StopToken) -> ScanSummary {
        let mut summary = ScanSummary::new(self.max_pfn, self.block_pages);
        if self.state.get() == ScanState::Stopped {
            return summary;
        }
        self.state.set(ScanState::Scanning);

        let candidates = self.candidates().collect::<Vec<_>>();
        let bar = self.progress.as_ref().map(|p| {
            let bar = p.add(ProgressBar::new(candidates.len() as u64));
            bar.set_style(ProgressStyle::block_bar("Scanning memory"));
            bar.enable_steady_tick(Duration::from_secs(1));
            bar
        });

        for pfn in candidates {
            if stop.should_stop() {
                info!("Stop requested, aborting scan at PFN {:#x}", pfn);
                self.state.set(ScanState::Stopped);
                break;
            }
            if let Some(bar) = &bar {
                bar.inc(1);
                bar.set_message(format!("PFN {:#x}", pfn));
            }
            summary.blocks_total += 1;

            if !is_block_valid(&self.map, pfn) {
                trace!("Skipping invalid block at PFN {:#x}", pfn);
                summary.skipped_invalid += 1;
                continue;
            }
            let block = MemoryBlock::new(pfn, self.block_pages);
            let mut storage = match self.claimer.claim(block) {
                Ok(storage) => storage,
                Err(e) => {
                    debug!("Failed to claim {}: {}", block, e);
                    summary.claim_failed += 1;
                    continue;
                }
            };
            let outcome = self.experiment.run(block, &mut storage);
            self.claimer.release(block, storage);
            match &outcome {
                Ok(_) => summary.measured += 1,
                Err(e @ ExperimentError::Mismatch { .. }) => {
                    error!("{}", e);
                    summary.mismatches += 1;
                }
                Err(e @ ExperimentError::StorageTooSmall { .. }) => {
                    error!("{}", e);
                    summary.storage_errors += 1;
                }
            }
            summary.results.push(outcome);
            std::thread::yield_now();
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        if self.state.get() == ScanState::Scanning {
            summary.completed = true;
            self.state.set(ScanState::IdleWait);
        }
        summary.log();
        summary
    }

    /// Scans the address space, then waits until `stop` is requested.
    pub fn run(&mut self, stop: &StopToken) -> ScanSummary {
        let summary = self.scan(stop);
        if self.state.get() == ScanState::IdleWait {
            info!("Scan complete, waiting for stop request");
            stop.wait();
            self.state.set(ScanState::Stopped);
        }
        summary
    }
}

impl<M, C> ScanDriver<M, C>
where
    M: PhysMemoryMap + Send + 'static,
    C: BlockClaimer + Send + 'static,
{
    /// Runs the driver on a dedicated worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Spawn`] if the worker thread cannot be created.
    pub fn spawn(mut self) -> Result<ScanHandle, ScanError> {
        let state = self.state.clone();
        let handle = spawn_cancelable("memstream", move |stop| self.run(&stop))?;
        Ok(ScanHandle { handle, state })
    }
}

/// Handle to a scan running on its worker thread.
pub struct ScanHandle {
    handle: CancelableJoinHandle<ScanSummary>,
    state: SharedState,
}

impl ScanHandle {
    /// Current state of the worker.
    pub fn state(&self) -> ScanState {
        self.state.get()
    }

    /// Returns `true` once the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the worker and waits for its summary.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::WorkerPanicked`] if the worker panicked.
    pub fn stop(self) -> Result<ScanSummary, ScanError> {
        self.handle.join().map_err(|_| ScanError::WorkerPanicked)
    }
}
