//! Utility types used throughout memstream.
//!
//! This module provides:
//! - [`Size`] - Memory size representation
//! - Constants for page and cache line geometry ([`PAGE_SIZE`], [`CL_SIZE`], etc.)
//! - A cancelable worker thread ([`spawn_cancelable`]) and its [`StopToken`]
//! - Progress bar style for the scan ([`BlockProgress`])

mod block_progress;
mod cancelable_thread;
mod constants;
mod size;

pub use self::block_progress::BlockProgress;
pub use self::cancelable_thread::*;
pub use self::constants::*;
pub use self::size::Size;
