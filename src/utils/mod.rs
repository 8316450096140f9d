//! Supporting I/O used by the binaries and by embedding applications.
//!
//! - **`checkpoint`**: eigenvalue CSV files and per-rank binary vector shards.
//! - **`memory`**: Linux `/proc` readings of available memory and peak usage,
//!   used to size the dense fallback and to report what a run cost.

pub mod checkpoint;
pub mod memory;
