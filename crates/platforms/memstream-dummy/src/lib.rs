//! Simulated physical memory for memstream.
//!
//! This crate provides a [`memstream_core::platform::PhysMemoryMap`] and a
//! [`memstream_core::platform::BlockClaimer`] that do not touch physical
//! memory at all. Zones, holes, reserved pages and busy blocks are described
//! up front with [`DummyPlatformBuilder`]; claimed blocks are backed by
//! anonymous mappings.
//!
//! # Use Cases
//!
//! - Integration testing of the scan driver
//! - Dry runs of the `memstream` binary without root privileges

#![warn(missing_docs)]

mod claimer;
mod map;

pub use claimer::{AnonStorage, DummyClaimError, DummyClaimer};
pub use map::{DummyMemoryMap, DummyPlatformBuilder, DummyZone};
