//! Parallel processing utilities for array operations
//!
//! This module provides functions for processing arrays in parallel
//! with deterministic seeding for reproducible results.

use ndarray::{Array, ArrayViewMut, Axis, Dimension};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Process an array in parallel chunks along its first axis with deterministic seeding
///
/// Each chunk gets a unique RNG seeded from the base seed plus the chunk
/// index, so the result only depends on `seed` and `chunk_size`, never on
/// how rayon schedules the work.
///
/// # Arguments
/// * `array` - The array to process (any dimensionality)
/// * `seed` - Base seed for random number generation
/// * `chunk_size` - Optional chunk size (number of rows per chunk). Defaults to 64 if None.
/// * `processor` - Closure that processes each chunk with its own RNG
///
/// # Returns
/// The processed array
pub fn process_array_in_parallel_chunks<D, F>(
    mut array: Array<f64, D>,
    seed: u64,
    chunk_size: Option<usize>,
    processor: F,
) -> Array<f64, D>
where
    D: Dimension,
    F: Fn(&mut ArrayViewMut<f64, D>, &mut StdRng) + Send + Sync,
{
    let chunk_size = chunk_size.unwrap_or(64).max(1);

    if array.ndim() == 0 || array.is_empty() {
        return array;
    }

    array
        .axis_chunks_iter_mut(Axis(0), chunk_size)
        .into_par_iter()
        .enumerate()
        .for_each(|(chunk_idx, mut chunk)| {
            let chunk_seed = seed.wrapping_add(chunk_idx as u64);
            let mut rng = StdRng::seed_from_u64(chunk_seed);

            processor(&mut chunk, &mut rng);
        });

    array
}
