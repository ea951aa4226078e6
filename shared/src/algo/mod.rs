//! Algorithms shared by the simulation crates
//!
//! This module provides seeded parallel processing, robust statistics,
//! interpolation helpers and tabulated functions.

pub mod lookup_table;
pub mod misc;
pub mod parallel;
pub mod stats;

pub use lookup_table::{LookupError, LookupTable};
pub use misc::{interp_extrapolate, nearest_index, resample_linear, InterpError};
pub use parallel::process_array_in_parallel_chunks;
pub use stats::{median, median_filter_1d, validate_window, StatsError};
