use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use indicatif::MultiProgress;
use log::{info, warn};
use memstream_bin::{init_logging_with_progress, install_stop_signals, parse_pfn, parse_ratio};
use memstream_core::platform::{BlockClaimer, PhysMemoryMap};
use memstream_core::util::Size::MB;
use memstream_core::{ScanConfig, ScanDriver, ScanState, ScanSummary};
use memstream_dummy::DummyPlatformBuilder;
use memstream_linux::LinuxPaths;
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Platform {
    /// Physical memory of this machine
    Linux,
    /// Simulated memory
    Dummy,
}

/// CLI arguments for the `memstream` binary.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// The platform providing physical memory.
    #[clap(long = "platform", value_enum, default_value = "linux")]
    platform: Platform,
    /// Simulated memory size in MB (dummy platform).
    #[clap(long = "dummy-size-mb", default_value = "256")]
    dummy_size_mb: usize,
    /// Fraction of simulated blocks that cannot be claimed (dummy platform).
    #[clap(long = "dummy-busy-ratio", default_value = "0.0", value_parser = parse_ratio)]
    dummy_busy_ratio: f64,
    /// Seed for choosing the busy blocks (dummy platform).
    #[clap(long = "dummy-seed", default_value = "0")]
    dummy_seed: u64,
    /// First PFN to scan (decimal or 0x-prefixed hex).
    #[clap(long = "start-pfn", value_parser = parse_pfn)]
    start_pfn: Option<u64>,
    /// End PFN of the scan, exclusive (decimal or 0x-prefixed hex).
    #[clap(long = "end-pfn", value_parser = parse_pfn)]
    end_pfn: Option<u64>,
    /// Stop the scan after this many seconds.
    #[clap(long = "timeout")]
    timeout: Option<u64>,
    /// Exit as soon as the scan is complete instead of waiting for a signal.
    #[clap(long = "exit-when-done")]
    exit_when_done: bool,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
}

impl CliArgs {
    fn scan_config(&self) -> ScanConfig {
        let pfn_range = match (self.start_pfn, self.end_pfn) {
            (None, None) => None,
            (start, end) => Some(start.unwrap_or(0)..end.unwrap_or(u64::MAX)),
        };
        ScanConfig { pfn_range }
    }
}

#[derive(Debug, Serialize)]
struct ScanReport {
    args: CliArgs,
    summary: ScanSummary,
}

impl ScanReport {
    fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Results saved to {}", filename);
        Ok(())
    }
}

/// Runs the scan worker until it is done, signalled or timed out.
fn scan<M, C>(
    map: M,
    claimer: C,
    args: &CliArgs,
    progress: MultiProgress,
    stop: &Arc<AtomicBool>,
) -> Result<ScanSummary>
where
    M: PhysMemoryMap + Send + 'static,
    C: BlockClaimer + Send + 'static,
{
    let handle = ScanDriver::new(map, claimer)
        .config(args.scan_config())
        .progress(progress)
        .spawn()?;
    let timeout = args.timeout.map(Duration::from_secs);
    let start_time = Instant::now();
    let mut announced = false;
    loop {
        if stop.load(Ordering::Relaxed) {
            info!("Received stop signal");
            break;
        }
        if timeout.is_some_and(|t| start_time.elapsed() >= t) {
            warn!("Timeout reached after {:?}", start_time.elapsed());
            break;
        }
        if handle.is_finished() {
            break;
        }
        if handle.state() == ScanState::IdleWait {
            if args.exit_when_done {
                break;
            }
            if !announced {
                info!("Scan complete, press Ctrl-C to exit");
                announced = true;
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    Ok(handle.stop()?)
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let stop = install_stop_signals()?;
    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let summary = match args.platform {
        Platform::Linux => {
            let (map, claimer) = memstream_linux::open(&LinuxPaths::default())?;
            scan(map, claimer, &args, progress, &stop)?
        }
        Platform::Dummy => {
            let (map, claimer) = DummyPlatformBuilder::with_size(MB(args.dummy_size_mb))
                .random_busy(args.dummy_busy_ratio, args.dummy_seed)
                .build();
            scan(map, claimer, &args, progress, &stop)?
        }
    };

    info!("=== SCAN SUMMARY ===");
    info!("Blocks scanned: {}", summary.blocks_total);
    info!("Blocks measured: {}", summary.measured);
    info!("Mismatches: {}", summary.mismatches);
    info!("Storage errors: {}", summary.storage_errors);
    info!("Completed: {}", summary.completed);

    if let Some(output_file) = args.output.clone() {
        ScanReport { args, summary }.save_to_file(&output_file)?;
    }
    Ok(())
}
