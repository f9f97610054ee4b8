//! # memstream core
//!
//! `memstream-core` measures the effective bandwidth of large, physically
//! contiguous memory blocks. Every block is measured twice with a STREAM-like
//! kernel: once with warm caches and once with the arrays evicted before every
//! phase. The ratio between both figures exposes slow or faulty memory ranges.
//!
//! ## Architecture Overview
//!
//! The platform services the measurement depends on are expressed as traits in
//! [`platform`]:
//!
//! - [`platform::PhysMemoryMap`] - Describes which physical pages exist, whether they
//!   are online, which zone owns them and whether they are reserved.
//!
//! - [`platform::BlockClaimer`] - Exclusively claims a physical block and hands out
//!   its [`platform::BackingStorage`], and gives it back afterwards.
//!
//! - [`platform::CacheFlush`] and [`platform::Clock`] - Cache line eviction and the
//!   monotonic timestamp source used by the kernel.
//!
//! ## Main Components
//!
//! - [`validator`] - Decides whether a block may be claimed at all.
//! - [`kernel`] - The four-phase bandwidth kernel in its cached and flushed variants.
//! - [`experiment::BlockExperiment`] - Measures and verifies a single claimed block.
//! - [`ScanDriver`] - Walks the whole physical address space on a dedicated,
//!   cancelable worker thread.
//!
//! ## Platform Support
//!
//! The default cache flush uses `clflush` and therefore requires x86_64. The
//! Linux platform lives in `memstream-linux`, a simulated platform for tests in
//! `memstream-dummy`.

#![warn(missing_docs)]

pub mod experiment;
pub mod kernel;
pub mod platform;
mod scan;
#[cfg(test)]
mod test_util;
pub mod util;
pub mod validator;

pub use scan::{ScanConfig, ScanDriver, ScanError, ScanHandle, ScanState, ScanSummary};
