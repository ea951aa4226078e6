//! Robust statistics: medians and running-median filters

use thiserror::Error;

/// Errors from the statistics helpers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StatsError {
    #[error("Insufficient data points to compute median: {0} total values, 0 valid (all NaN)")]
    NoValidValues(usize),

    #[error("Median filter window must be odd and non-zero, got {0}")]
    InvalidWindow(usize),
}

/// Calculate median of a slice of f64 values
///
/// This function computes the median while filtering out NaN values but including
/// infinite values (±inf). For even-length data, returns the average of the two
/// middle values.
///
/// # Arguments
///
/// * `values` - Slice of f64 values to compute median from
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(StatsError::NoValidValues)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(StatsError::NoValidValues(values.len()));
    }

    valid_values.sort_by(|a, b| a.total_cmp(b));

    let median_value = if valid_values.len() % 2 == 0 {
        let mid = valid_values.len() / 2;
        (valid_values[mid - 1] + valid_values[mid]) / 2.0
    } else {
        valid_values[valid_values.len() / 2]
    };

    Ok(median_value)
}

/// Check that a running-median window is odd and non-zero.
pub fn validate_window(window: usize) -> Result<(), StatsError> {
    if window == 0 || window % 2 == 0 {
        return Err(StatsError::InvalidWindow(window));
    }
    Ok(())
}

/// Running median of a 1-D signal with zero padding at both ends.
///
/// Output sample `i` is the median of the `window` samples centred on `i`,
/// where samples beyond either end count as `0.0`. This is the edge
/// convention of the classic signal-processing `medfilt`, so values near the
/// ends are pulled towards zero.
///
/// NaN inputs are ordered above `+inf`; callers should finite-ise first when
/// that matters.
///
/// # Arguments
/// * `values` - Input signal
/// * `window` - Odd window length
pub fn median_filter_1d(values: &[f64], window: usize) -> Result<Vec<f64>, StatsError> {
    validate_window(window)?;

    let n = values.len();
    let half = window / 2;
    let mut scratch = vec![0.0; window];

    let filtered = (0..n)
        .map(|i| {
            for (k, slot) in scratch.iter_mut().enumerate() {
                let idx = i as isize + k as isize - half as isize;
                *slot = if idx >= 0 && (idx as usize) < n {
                    values[idx as usize]
                } else {
                    0.0
                };
            }
            scratch.sort_by(|a, b| a.total_cmp(b));
            scratch[half]
        })
        .collect();

    Ok(filtered)
}
