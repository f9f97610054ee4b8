//! Linux platform for memstream.
//!
//! This crate describes physical memory through procfs and sysfs and claims
//! blocks with the memory hotplug interface:
//!
//! - the block granularity is the hotplug block size
//!   (`/sys/devices/system/memory/block_size_bytes`),
//! - zone spans and node ends come from `/proc/zoneinfo`,
//! - online state and zone of a block come from its `memoryN` directory,
//! - reserved pages are read from `/proc/kpageflags`.
//!
//! Claiming a block offlines it, which makes the kernel migrate every movable
//! page away, and maps the range through `/dev/mem`. Releasing brings it back
//! online.
//!
//! Implements [`memstream_core::platform::PhysMemoryMap`] and
//! [`memstream_core::platform::BlockClaimer`].
//!
//! # Platform Requirements
//!
//! - x86_64 Linux with `CONFIG_MEMORY_HOTREMOVE`
//! - Root privileges
//! - Kernel must allow `/dev/mem` access to RAM (no `CONFIG_STRICT_DEVMEM`)

#![warn(missing_docs)]

mod claimer;
mod kpageflags;
mod map;
mod sysfs;
mod zoneinfo;

pub use claimer::{DevMemStorage, LinuxClaimer};
pub use map::LinuxMemoryMap;
pub use zoneinfo::ZoneSpan;

use memstream_core::platform::PhysMemoryMap;
use std::path::PathBuf;
use thiserror::Error;

/// Locations of the kernel interfaces used by the platform.
#[derive(Clone, Debug)]
pub struct LinuxPaths {
    /// Memory hotplug directory
    pub memory: PathBuf,
    /// Zone statistics
    pub zoneinfo: PathBuf,
    /// Per-page flags
    pub kpageflags: PathBuf,
    /// Physical memory device
    pub dev_mem: PathBuf,
}

impl Default for LinuxPaths {
    fn default() -> Self {
        LinuxPaths {
            memory: "/sys/devices/system/memory".into(),
            zoneinfo: "/proc/zoneinfo".into(),
            kpageflags: "/proc/kpageflags".into(),
            dev_mem: "/dev/mem".into(),
        }
    }
}

/// Errors of the Linux platform.
#[derive(Debug, Error)]
pub enum LinuxPlatformError {
    /// A kernel interface could not be accessed
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// A kernel interface returned something unexpected
    #[error("Unexpected content in {}: {content:?}", .path.display())]
    Parse {
        /// File that was parsed
        path: PathBuf,
        /// Offending content
        content: String,
    },
    /// The kernel refused to change the state of a memory block
    #[error("Failed to {state} memory block {index}: {source}")]
    State {
        /// Hotplug block index
        index: u64,
        /// Requested state
        state: &'static str,
        /// Underlying error
        source: std::io::Error,
    },
    /// The claimed range could not be mapped
    #[error("Failed to map {block} through /dev/mem: {source}")]
    Map {
        /// The block being claimed
        block: memstream_core::platform::MemoryBlock,
        /// Underlying error
        source: std::io::Error,
    },
}

impl LinuxPlatformError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| LinuxPlatformError::Io { path, source }
    }
}

/// Opens the memory map and the claimer for the running system.
///
/// # Errors
///
/// Returns an error if one of the kernel interfaces is missing or unreadable,
/// typically because of missing privileges.
pub fn open(paths: &LinuxPaths) -> Result<(LinuxMemoryMap, LinuxClaimer), LinuxPlatformError> {
    let map = LinuxMemoryMap::open(paths)?;
    let claimer = LinuxClaimer::open(paths, map.block_pages())?;
    Ok((map, claimer))
}

#[cfg(test)]
mod fake;
