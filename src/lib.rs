//! Per-block physical memory bandwidth scanner.
//!
//! Re-exports [`memstream_core`] and, behind the `dummy` and `linux`
//! features, the platform crates.

pub use memstream_core::*;

#[cfg(feature = "dummy")]
pub use memstream_dummy as dummy;
#[cfg(feature = "linux")]
pub use memstream_linux as linux;
