//! Shared components and utilities for the mock IFU workspace.
//!
//! This crate holds the small numerical building blocks that do not depend on
//! any spectroscopic concept: seeded parallel chunk processing, medians and
//! running-median filters, and 1-D interpolation on sorted grids.

pub mod algo;
