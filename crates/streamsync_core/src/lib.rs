//! StreamSync Core - pulse-based multi-stream alignment.
//!
//! This crate aligns independently-recorded data streams onto a single
//! reference timebase using a shared synchronization pulse sequence
//! embedded in each stream. It contains no I/O: callers hand it raw
//! numeric signals and consume warp functions, annotations, and reports.

pub mod config;
pub mod logging;
pub mod sync;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
