//! # memstream
//!
//! memstream measures the memory bandwidth of every claimable block of
//! physical memory. For each block it runs a STREAM-like kernel (copy, scale,
//! add, triad) twice, once with warm caches and once flushing the working set
//! before every phase, and reports both figures.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # Dry run against simulated memory
//! cargo run --release --bin=memstream -- --platform dummy --exit-when-done
//!
//! # Scan the physical memory of this machine (root, no STRICT_DEVMEM)
//! sudo target/release/memstream --platform linux --output scan.json
//! ```
//!
//! Without `--exit-when-done` the scan idles after the last block until it
//! receives SIGINT or SIGTERM, or the `--timeout` expires.

#[macro_use]
extern crate log;

use anyhow::Context;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Registers SIGINT and SIGTERM to raise the returned flag.
pub fn install_stop_signals() -> anyhow::Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .context("could not register signal handler")?;
    }
    debug!("Installed SIGINT/SIGTERM handlers");
    Ok(stop)
}

/// Parses a PFN given in decimal or as `0x`-prefixed hex.
pub fn parse_pfn(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Parses a busy ratio in `[0, 1]`.
pub fn parse_ratio(s: &str) -> Result<f64, String> {
    let ratio = s.parse::<f64>().map_err(|e| e.to_string())?;
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{} is not in [0, 1]", s))
    }
}
