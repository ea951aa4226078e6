//! Lookups on sorted 1-D tables: linear interpolation and nearest-sample
//! search.

use thiserror::Error;

/// Malformed interpolation table
#[derive(Error, Debug, PartialEq)]
pub enum InterpError {
    #[error("Input vectors must have at least 2 points")]
    InsufficientData,
    #[error("Input vectors must have the same length")]
    MismatchedLengths,
    #[error("X values must be sorted in ascending order")]
    UnsortedData,
}

fn validate_table(xs: &[f64], ys: &[f64]) -> Result<(), InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths);
    }

    if xs.len() < 2 {
        return Err(InterpError::InsufficientData);
    }

    if xs.windows(2).any(|w| w[1] <= w[0]) {
        return Err(InterpError::UnsortedData);
    }

    Ok(())
}

/// Index of the segment `[xs[i], xs[i + 1]]` to use for `x`, clamped to the
/// first and last segments.
fn segment_index(x: f64, xs: &[f64]) -> usize {
    let upper = xs.partition_point(|&v| v <= x);
    upper.clamp(1, xs.len() - 1) - 1
}

/// Linear interpolation in a strictly ascending table, continuing the end
/// segments as straight lines beyond the table.
///
/// # Errors
/// * `InsufficientData`, `MismatchedLengths`, `UnsortedData` for a bad table
///
/// ```rust
/// use shared::algo::misc::interp_extrapolate;
///
/// let wave = [5000.0, 6000.0];
/// let a_lambda = [1.2, 0.9];
/// let inside = interp_extrapolate(5500.0, &wave, &a_lambda).unwrap();
/// let beyond = interp_extrapolate(7000.0, &wave, &a_lambda).unwrap();
/// assert!((inside - 1.05).abs() < 1e-12);
/// assert!((beyond - 0.6).abs() < 1e-12);
/// ```
pub fn interp_extrapolate(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    validate_table(xs, ys)?;

    let i = segment_index(x, xs);
    let t = (x - xs[i]) / (xs[i + 1] - xs[i]);
    Ok(ys[i] + t * (ys[i + 1] - ys[i]))
}

/// Linearly resample a table onto new abscissae.
///
/// Points outside `[xs[0], xs[n-1]]` get `fill`. The table is validated once,
/// so resampling a long spectrum costs O(m log n).
///
/// # Errors
/// * `InsufficientData`, `MismatchedLengths`, `UnsortedData` for a bad table
pub fn resample_linear(
    xs: &[f64],
    ys: &[f64],
    new_xs: &[f64],
    fill: f64,
) -> Result<Vec<f64>, InterpError> {
    validate_table(xs, ys)?;

    let (lo, hi) = (xs[0], xs[xs.len() - 1]);
    Ok(new_xs
        .iter()
        .map(|&x| {
            if !(lo..=hi).contains(&x) {
                return fill;
            }
            let i = segment_index(x, xs);
            let t = (x - xs[i]) / (xs[i + 1] - xs[i]);
            ys[i] + t * (ys[i + 1] - ys[i])
        })
        .collect())
}

/// Index of the entry of a sorted grid closest to `x`.
///
/// Ties go to the lower index. Returns `None` for an empty grid or a
/// non-finite `x`.
pub fn nearest_index(grid: &[f64], x: f64) -> Option<usize> {
    if grid.is_empty() || !x.is_finite() {
        return None;
    }

    let upper = grid.partition_point(|&v| v < x);
    if upper == 0 {
        return Some(0);
    }
    if upper == grid.len() {
        return Some(grid.len() - 1);
    }

    let below = x - grid[upper - 1];
    let above = grid[upper] - x;
    if above < below {
        Some(upper)
    } else {
        Some(upper - 1)
    }
}
