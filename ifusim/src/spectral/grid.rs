//! Logarithmic wavelength grids.
//!
//! A [`LogWavelengthGrid`] stores log10(λ/Å) samples with a constant step
//! `dlogl`, so every pixel spans the same fractional wavelength interval.
//! This is the canonical target onto which all spectra are regridded.

use ndarray::{Array1, ArrayView1};
use std::f64::consts::LN_10;

use crate::error::{IfuSimError, Result};

/// Largest tolerated deviation of a single step from `dlogl`, as a fraction of `dlogl`
const UNIFORMITY_TOLERANCE: f64 = 1.0e-3;

/// Mean log-wavelength step, rounded to 8 decimals.
///
/// Returns `None` when fewer than two samples are given.
pub fn determine_dlogl(logl: &[f64]) -> Option<f64> {
    if logl.len() < 2 {
        return None;
    }
    let mean_step = (logl[logl.len() - 1] - logl[0]) / (logl.len() - 1) as f64;
    Some((mean_step * 1.0e8).round() / 1.0e8)
}

/// Wavelength grid with constant spacing in log10(λ)
#[derive(Debug, Clone, PartialEq)]
pub struct LogWavelengthGrid {
    logl: Array1<f64>,
    dlogl: f64,
}

impl LogWavelengthGrid {
    /// Build a grid from its first log10 wavelength, step and length.
    pub fn new(logl_start: f64, dlogl: f64, len: usize) -> Result<Self> {
        if !logl_start.is_finite() {
            return Err(IfuSimError::invalid("logl_start", "must be finite"));
        }
        if !(dlogl.is_finite() && dlogl > 0.0) {
            return Err(IfuSimError::invalid(
                "dlogl",
                format!("must be finite and positive, got {dlogl}"),
            ));
        }
        if len == 0 {
            return Err(IfuSimError::EmptyInput("log wavelength grid"));
        }

        let logl = Array1::from_shape_fn(len, |i| logl_start + i as f64 * dlogl);
        Ok(Self { logl, dlogl })
    }

    /// Build a grid from log10 wavelength samples, checking that they are uniform.
    ///
    /// The samples are kept as given (so a regridded spectrum lands exactly on
    /// an instrument's published grid); `dlogl` is the rounded mean step.
    pub fn from_log_values(logl: ArrayView1<f64>) -> Result<Self> {
        if logl.is_empty() {
            return Err(IfuSimError::EmptyInput("log wavelength grid"));
        }
        if logl.iter().any(|v| !v.is_finite()) {
            return Err(IfuSimError::IrregularGrid(
                "grid contains non-finite values".to_string(),
            ));
        }

        let values = logl.to_vec();
        let dlogl = determine_dlogl(&values).ok_or_else(|| {
            IfuSimError::IrregularGrid("a grid needs at least two samples".to_string())
        })?;
        if dlogl <= 0.0 {
            return Err(IfuSimError::IrregularGrid(format!(
                "grid must be strictly increasing (mean step {dlogl})"
            )));
        }

        for (i, w) in values.windows(2).enumerate() {
            let step = w[1] - w[0];
            if (step - dlogl).abs() > UNIFORMITY_TOLERANCE * dlogl {
                return Err(IfuSimError::IrregularGrid(format!(
                    "step {step:e} between pixels {i} and {} differs from dlogl {dlogl:e}",
                    i + 1
                )));
            }
        }

        Ok(Self {
            logl: logl.to_owned(),
            dlogl,
        })
    }

    /// Build a grid from wavelengths in Ångström.
    pub fn from_wavelengths(wavelength: ArrayView1<f64>) -> Result<Self> {
        if let Some((index, &value)) = wavelength
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return Err(IfuSimError::IrregularGrid(format!(
                "wavelength {value} at index {index} is not positive"
            )));
        }
        Self::from_log_values(wavelength.mapv(f64::log10).view())
    }

    /// log10(λ) samples
    pub fn log_values(&self) -> ArrayView1<'_, f64> {
        self.logl.view()
    }

    /// Wavelengths in Ångström
    pub fn wavelengths(&self) -> Array1<f64> {
        self.logl.mapv(|l| 10f64.powf(l))
    }

    /// Step in log10(λ)
    pub fn dlogl(&self) -> f64 {
        self.dlogl
    }

    /// Step in ln(λ)
    pub fn ln_step(&self) -> f64 {
        self.dlogl * LN_10
    }

    pub fn len(&self) -> usize {
        self.logl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logl.is_empty()
    }

    /// Central pixel used to anchor integer-pixel regridding.
    pub fn reference_index(&self) -> usize {
        (self.len() - 1) / 2
    }

    /// Copy of this grid with one extra pixel on each end.
    pub fn expanded(&self) -> Self {
        let n = self.len();
        let mut logl = Array1::zeros(n + 2);
        logl[0] = self.logl[0] - self.dlogl;
        logl.slice_mut(ndarray::s![1..n + 1]).assign(&self.logl);
        logl[n + 1] = self.logl[n - 1] + self.dlogl;
        Self {
            logl,
            dlogl: self.dlogl,
        }
    }
}
