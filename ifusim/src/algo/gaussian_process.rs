//! One-dimensional Gaussian-process regression with a squared-exponential kernel.
//!
//! Targets are standardised before fitting, so the kernel amplitude is fixed
//! at one and only the length scale is tuned. Each training point carries
//! its own noise variance, which lets heteroscedastic calibration data
//! (different measurement errors per point) enter the fit directly.
//!
//! The length scale is picked from a candidate list by maximising the log
//! marginal likelihood
//!
//! ```text
//! log p(y | X, l) = -½ yᵀ K⁻¹ y - Σ log L_ii - (n/2) log 2π
//! ```
//!
//! with `K = L Lᵀ` the Cholesky factorisation of the noisy kernel matrix.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1};
use std::f64::consts::PI;

use crate::error::{IfuSimError, Result};

/// Squared-exponential covariance between two points
#[inline]
pub fn rbf_kernel(a: f64, b: f64, length_scale: f64) -> f64 {
    let d = (a - b) / length_scale;
    (-0.5 * d * d).exp()
}

/// `n` logarithmically spaced values spanning `[lo, hi]`
pub fn log_spaced(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![(lo * hi).sqrt()],
        _ => {
            let (log_lo, log_hi) = (lo.ln(), hi.ln());
            let step = (log_hi - log_lo) / (n - 1) as f64;
            (0..n).map(|i| (log_lo + i as f64 * step).exp()).collect()
        }
    }
}

/// A fitted Gaussian-process regressor
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    x_train: Vec<f64>,
    alpha: DVector<f64>,
    length_scale: f64,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

struct Candidate {
    alpha: DVector<f64>,
    length_scale: f64,
    lml: f64,
}

impl GaussianProcess {
    /// Fit to `(x, y)` with per-point noise standard deviations `noise_std`.
    ///
    /// # Arguments
    /// * `x`, `y` - Training inputs and targets
    /// * `noise_std` - Measurement uncertainty of each target, in target units
    /// * `length_scales` - Candidate kernel length scales, in units of `x`
    /// * `jitter` - Added to every diagonal element of the standardised problem
    ///
    /// # Errors
    /// Fails on empty or mismatched inputs, no candidate length scales, or
    /// when no candidate kernel matrix can be factorised.
    pub fn fit(
        x: &[f64],
        y: &[f64],
        noise_std: &[f64],
        length_scales: &[f64],
        jitter: f64,
    ) -> Result<Self> {
        let n = x.len();
        if n == 0 {
            return Err(IfuSimError::EmptyInput("Gaussian process training set"));
        }
        if y.len() != n || noise_std.len() != n {
            return Err(IfuSimError::shape_mismatch(
                "Gaussian process training set",
                &[n, n, n],
                &[x.len(), y.len(), noise_std.len()],
            ));
        }
        if length_scales.is_empty() {
            return Err(IfuSimError::EmptyInput("length scale candidates"));
        }

        let y_mean = y.iter().sum::<f64>() / n as f64;
        let variance = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n as f64;
        let y_std = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        let y_std_vec = DVector::from_iterator(n, y.iter().map(|v| (v - y_mean) / y_std));
        let noise_var: Vec<f64> = noise_std
            .iter()
            .map(|s| (s / y_std).powi(2) + jitter)
            .collect();

        let mut best: Option<Candidate> = None;
        for &length_scale in length_scales {
            let Some(candidate) = Self::evaluate(x, &y_std_vec, &noise_var, length_scale) else {
                log::debug!("Kernel matrix not positive definite for length scale {length_scale}");
                continue;
            };
            if best.as_ref().map_or(true, |b| candidate.lml > b.lml) {
                best = Some(candidate);
            }
        }

        let best = best.ok_or_else(|| {
            IfuSimError::Numerical(
                "Cholesky factorisation failed for every candidate length scale".to_string(),
            )
        })?;
        log::debug!(
            "GP fit on {n} points: length scale {:.4e}, log marginal likelihood {:.3}",
            best.length_scale,
            best.lml
        );

        Ok(Self {
            x_train: x.to_vec(),
            alpha: best.alpha,
            length_scale: best.length_scale,
            y_mean,
            y_std,
            log_marginal_likelihood: best.lml,
        })
    }

    fn evaluate(
        x: &[f64],
        y: &DVector<f64>,
        noise_var: &[f64],
        length_scale: f64,
    ) -> Option<Candidate> {
        let n = x.len();
        let k = DMatrix::from_fn(n, n, |i, j| {
            let kij = rbf_kernel(x[i], x[j], length_scale);
            if i == j {
                kij + noise_var[i]
            } else {
                kij
            }
        });
        let chol = k.cholesky()?;
        let alpha = chol.solve(y);

        let log_det_half: f64 = chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
        let lml = -0.5 * y.dot(&alpha) - log_det_half - 0.5 * n as f64 * (2.0 * PI).ln();
        if !lml.is_finite() {
            return None;
        }

        Some(Candidate {
            alpha,
            length_scale,
            lml,
        })
    }

    /// Posterior mean at `x`, in the original target units
    pub fn predict(&self, x: f64) -> f64 {
        let standardised: f64 = self
            .x_train
            .iter()
            .zip(self.alpha.iter())
            .map(|(&xi, &a)| rbf_kernel(x, xi, self.length_scale) * a)
            .sum();
        self.y_mean + self.y_std * standardised
    }

    /// Posterior mean at every element of `x`
    pub fn predict_array(&self, x: ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| self.predict(v))
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    pub fn n_training_points(&self) -> usize {
        self.x_train.len()
    }
}
