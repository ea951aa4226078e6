//! Line-spread-function model.
//!
//! The instrument's spectral resolution `R(λ) = λ/Δλ` is learnt from noisy
//! per-wavelength calibration measurements by Gaussian-process regression,
//! and then converted into Gaussian kernel widths in pixels of a log10 grid:
//!
//! ```text
//! width_pix = 1 / (dlogl · ln 10 · R(λ)) / (1 + z)
//! ```
//!
//! A model is fitted once (usually from the calibration columns of many
//! reference cubes) and then shared read-only.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3, Zip};
use serde::{Deserialize, Serialize};
use shared::algo::LookupTable;
use std::f64::consts::LN_10;

use crate::algo::gaussian_process::{log_spaced, GaussianProcess};
use crate::error::{IfuSimError, Result};
use crate::mock::reference::ReferenceCube;
use crate::spectral::redshift::Redshift;

/// Number of samples used when a model is tabulated over a wavelength range
const TABLE_POINTS: usize = 2048;

/// Inputs smaller than this are evaluated directly rather than via a table
const DIRECT_EVALUATION_LIMIT: usize = 4096;

/// Regression settings for [`LineSpreadFunction::fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsfFitConfig {
    /// Calibration rows beyond this count are combined into wavelength bins
    pub max_training_points: usize,
    /// Smallest and largest kernel length scale tried, in Ångström
    pub length_scale_bounds: (f64, f64),
    /// Number of log-spaced length scales tried between the bounds
    pub n_length_scales: usize,
    /// Diagonal jitter added to the standardised kernel matrix
    pub jitter: f64,
}

impl Default for LsfFitConfig {
    fn default() -> Self {
        Self {
            max_training_points: 200,
            length_scale_bounds: (100.0, 20000.0),
            n_length_scales: 24,
            jitter: 1.0e-6,
        }
    }
}

impl LsfFitConfig {
    fn validate(&self) -> Result<()> {
        let (lo, hi) = self.length_scale_bounds;
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo <= hi) {
            return Err(IfuSimError::invalid(
                "length_scale_bounds",
                format!("need 0 < lo <= hi, got ({lo}, {hi})"),
            ));
        }
        if self.n_length_scales == 0 {
            return Err(IfuSimError::invalid("n_length_scales", "must be at least 1"));
        }
        if self.max_training_points == 0 {
            return Err(IfuSimError::invalid(
                "max_training_points",
                "must be at least 1",
            ));
        }
        if !(self.jitter.is_finite() && self.jitter >= 0.0) {
            return Err(IfuSimError::invalid("jitter", "must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Calibration rows that survived filtering (and possibly binning)
#[derive(Debug, Clone, Default)]
struct Calibration {
    wavelength: Vec<f64>,
    resolution: Vec<f64>,
    uncertainty: Vec<f64>,
}

impl Calibration {
    fn filtered(
        wavelength: ArrayView1<f64>,
        resolution: ArrayView1<f64>,
        uncertainty: ArrayView1<f64>,
    ) -> Self {
        let mut cal = Calibration::default();
        Zip::from(&wavelength)
            .and(&resolution)
            .and(&uncertainty)
            .for_each(|&l, &r, &u| {
                let usable = l.is_finite()
                    && r.is_finite()
                    && u.is_finite()
                    && l > 0.0
                    && r > 0.0
                    && u >= 0.0;
                if usable {
                    cal.wavelength.push(l);
                    cal.resolution.push(r);
                    cal.uncertainty.push(u);
                }
            });
        cal
    }

    fn len(&self) -> usize {
        self.wavelength.len()
    }

    /// Combine rows into `n_bins` equal-width wavelength bins by
    /// inverse-variance weighted mean.
    fn binned(&self, n_bins: usize) -> Self {
        let (lo, hi) = self
            .wavelength
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &l| {
                (lo.min(l), hi.max(l))
            });
        let width = (hi - lo) / n_bins as f64;
        if width <= 0.0 {
            return self.weighted_means(vec![0; self.len()], 1);
        }

        let assignment = self
            .wavelength
            .iter()
            .map(|&l| (((l - lo) / width) as usize).min(n_bins - 1))
            .collect();
        self.weighted_means(assignment, n_bins)
    }

    fn weighted_means(&self, assignment: Vec<usize>, n_bins: usize) -> Self {
        // Zero uncertainties would give infinite weight
        const MIN_VARIANCE: f64 = 1.0e-12;

        let mut sum_w = vec![0.0; n_bins];
        let mut sum_wl = vec![0.0; n_bins];
        let mut sum_wr = vec![0.0; n_bins];
        for (k, &bin) in assignment.iter().enumerate() {
            let w = 1.0 / (self.uncertainty[k].powi(2) + MIN_VARIANCE);
            sum_w[bin] += w;
            sum_wl[bin] += w * self.wavelength[k];
            sum_wr[bin] += w * self.resolution[k];
        }

        let mut out = Calibration::default();
        for bin in 0..n_bins {
            if sum_w[bin] > 0.0 {
                out.wavelength.push(sum_wl[bin] / sum_w[bin]);
                out.resolution.push(sum_wr[bin] / sum_w[bin]);
                out.uncertainty.push((1.0 / sum_w[bin]).sqrt());
            }
        }
        out
    }
}

/// Spectral resolution as a smooth function of wavelength
#[derive(Debug, Clone)]
pub struct LineSpreadFunction {
    gp: GaussianProcess,
    wavelength_range: (f64, f64),
    n_calibration_rows: usize,
}

impl LineSpreadFunction {
    /// Fit `R(λ)` to calibration measurements.
    ///
    /// Rows with a non-finite entry, non-positive wavelength or resolution,
    /// or negative uncertainty are ignored.
    ///
    /// # Errors
    /// * `ShapeMismatch` if the three columns differ in length
    /// * `EmptyCalibration` if no row is usable
    pub fn fit(
        wavelength: ArrayView1<f64>,
        resolution: ArrayView1<f64>,
        uncertainty: ArrayView1<f64>,
        config: &LsfFitConfig,
    ) -> Result<Self> {
        config.validate()?;
        let n_rows = wavelength.len();
        if resolution.len() != n_rows || uncertainty.len() != n_rows {
            return Err(IfuSimError::shape_mismatch(
                "LSF calibration columns",
                &[n_rows, n_rows, n_rows],
                &[wavelength.len(), resolution.len(), uncertainty.len()],
            ));
        }

        let mut cal = Calibration::filtered(wavelength, resolution, uncertainty);
        if cal.len() == 0 {
            return Err(IfuSimError::EmptyCalibration(n_rows));
        }
        if cal.len() < n_rows {
            log::debug!(
                "Dropped {} of {n_rows} unusable LSF calibration rows",
                n_rows - cal.len()
            );
        }
        if cal.len() > config.max_training_points {
            log::debug!(
                "Binning {} LSF calibration rows into {} wavelength bins",
                cal.len(),
                config.max_training_points
            );
            cal = cal.binned(config.max_training_points);
        }

        let wavelength_range = cal
            .wavelength
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &l| {
                (lo.min(l), hi.max(l))
            });

        let (lo, hi) = config.length_scale_bounds;
        let length_scales = log_spaced(lo, hi, config.n_length_scales);
        let gp = GaussianProcess::fit(
            &cal.wavelength,
            &cal.resolution,
            &cal.uncertainty,
            &length_scales,
            config.jitter,
        )?;

        Ok(Self {
            gp,
            wavelength_range,
            n_calibration_rows: n_rows,
        })
    }

    /// Fit from the calibration columns of several reference cubes.
    pub fn fit_from_cubes(cubes: &[ReferenceCube], config: &LsfFitConfig) -> Result<Self> {
        if cubes.is_empty() {
            return Err(IfuSimError::EmptyCalibration(0));
        }
        let wavelength: Array1<f64> = cubes
            .iter()
            .flat_map(|c| c.wavelength.iter().copied())
            .collect();
        let resolution: Array1<f64> = cubes
            .iter()
            .flat_map(|c| c.spectral_resolution.iter().copied())
            .collect();
        let uncertainty: Array1<f64> = cubes
            .iter()
            .flat_map(|c| c.spectral_resolution_uncertainty.iter().copied())
            .collect();

        Self::fit(
            wavelength.view(),
            resolution.view(),
            uncertainty.view(),
            config,
        )
    }

    /// Regressed resolution `R = λ/Δλ` at one wavelength (Å)
    pub fn resolution_at(&self, wavelength: f64) -> f64 {
        self.gp.predict(wavelength)
    }

    /// Gaussian LSF widths in pixels of a log10 grid with step `dlogl`,
    /// for a frame shifted by `z` relative to the calibration frame.
    pub fn width_in_pixels(
        &self,
        wavelength: ArrayView1<f64>,
        dlogl: f64,
        z: f64,
    ) -> Result<Array1<f64>> {
        let scale = width_scale(dlogl, z)?;
        Ok(wavelength.mapv(|l| scale / self.resolution_at(l)))
    }

    /// Widths at every element of a (wavelength, row, col) cube of wavelengths.
    ///
    /// Large cubes go through a [`LookupTable`] spanning the cube's wavelength
    /// range instead of evaluating the regression at every element.
    pub fn width_field(
        &self,
        wavelength: ArrayView3<f64>,
        dlogl: f64,
        z: f64,
    ) -> Result<Array3<f64>> {
        let scale = width_scale(dlogl, z)?;
        let (lo, hi) = wavelength
            .iter()
            .filter(|l| l.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &l| {
                (lo.min(l), hi.max(l))
            });

        let mut out = Array3::zeros(wavelength.raw_dim());
        if wavelength.len() <= DIRECT_EVALUATION_LIMIT || !(lo < hi) {
            Zip::from(&mut out)
                .and(&wavelength)
                .par_for_each(|w, &l| *w = scale / self.resolution_at(l));
        } else {
            let table = self.tabulate(lo, hi, TABLE_POINTS)?;
            Zip::from(&mut out)
                .and(&wavelength)
                .par_for_each(|w, &l| *w = scale / table.eval_clamped(l));
        }
        Ok(out)
    }

    /// Tabulate `R(λ)` on `n_points` samples of `[lo, hi]`.
    pub fn tabulate(&self, lo: f64, hi: f64, n_points: usize) -> Result<LookupTable> {
        Ok(LookupTable::new(lo, hi, n_points, |l| self.resolution_at(l))?)
    }

    /// Correlation matrix of pixels blurred by this LSF.
    ///
    /// The wavelength axis is rescaled to cumulative distance in units of the
    /// local LSF width (`Σ dλ / σ_λ` with `σ_λ = λ / R(λ)`), and pixel pairs
    /// at rescaled distance `D` correlate as `exp(-D²/2)`.
    ///
    /// # Arguments
    /// * `wavelength` - Pixel centres (Å)
    /// * `dlambda` - Width of each pixel (Å)
    pub fn covariance_kernel(
        &self,
        wavelength: ArrayView1<f64>,
        dlambda: ArrayView1<f64>,
    ) -> Result<Array2<f64>> {
        let n = wavelength.len();
        if n == 0 {
            return Err(IfuSimError::EmptyInput("LSF covariance wavelengths"));
        }
        if dlambda.len() != n {
            return Err(IfuSimError::shape_mismatch(
                "LSF covariance pixel widths",
                &[n],
                &[dlambda.len()],
            ));
        }

        let mut distance = Array1::zeros(n);
        let mut running = 0.0;
        for (k, (&l, &dl)) in wavelength.iter().zip(dlambda.iter()).enumerate() {
            let sigma_l = l / self.resolution_at(l);
            if !(sigma_l.is_finite() && sigma_l > 0.0) {
                return Err(IfuSimError::NonPositiveWidth {
                    value: sigma_l,
                    index: k,
                });
            }
            running += dl / sigma_l;
            distance[k] = running;
        }

        Ok(Array2::from_shape_fn((n, n), |(i, j)| {
            let d = distance[i] - distance[j];
            (-0.5 * d * d).exp()
        }))
    }

    /// Wavelength span of the training data
    pub fn wavelength_range(&self) -> (f64, f64) {
        self.wavelength_range
    }

    /// Number of calibration rows supplied to the fit, before filtering
    pub fn n_calibration_rows(&self) -> usize {
        self.n_calibration_rows
    }

    pub fn length_scale(&self) -> f64 {
        self.gp.length_scale()
    }
}

/// `1 / (dlogl · ln 10) / (1 + z)`
fn width_scale(dlogl: f64, z: f64) -> Result<f64> {
    let z = Redshift::new(z)?;
    if !(dlogl.is_finite() && dlogl > 0.0) {
        return Err(IfuSimError::invalid(
            "dlogl",
            format!("must be finite and positive, got {dlogl}"),
        ));
    }
    Ok(1.0 / (dlogl * LN_10) / z.one_plus())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array2, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn true_resolution(l: f64) -> f64 {
        1800.0 + 0.15 * (l - 3600.0) + 80.0 * ((l - 3600.0) / 1500.0).sin()
    }

    fn calibration(n: usize, seed: u64) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 5.0).unwrap();
        let wave = Array1::linspace(3600.0, 10300.0, n);
        let res = wave.mapv(|l| true_resolution(l) + noise.sample(&mut rng));
        let unc = Array1::from_elem(n, 5.0);
        (wave, res, unc)
    }

    fn fitted() -> LineSpreadFunction {
        let (w, r, u) = calibration(150, 3);
        LineSpreadFunction::fit(w.view(), r.view(), u.view(), &LsfFitConfig::default()).unwrap()
    }

    #[test]
    fn test_fit_recovers_resolution_curve() {
        let lsf = fitted();
        for l in [4000.0, 5500.0, 7000.0, 9500.0] {
            assert_relative_eq!(lsf.resolution_at(l), true_resolution(l), max_relative = 0.01);
        }
        assert_eq!(lsf.n_calibration_rows(), 150);
        let (lo, hi) = lsf.wavelength_range();
        assert_relative_eq!(lo, 3600.0);
        assert_relative_eq!(hi, 10300.0);
    }

    #[test]
    fn test_width_formula_and_redshift_dilation() {
        let lsf = fitted();
        let wave = ndarray::array![5000.0, 8000.0];
        let dlogl = 1.0e-4;

        let w0 = lsf.width_in_pixels(wave.view(), dlogl, 0.0).unwrap();
        let expected = 1.0 / (dlogl * LN_10 * lsf.resolution_at(5000.0));
        assert_relative_eq!(w0[0], expected, max_relative = 1e-12);

        let wz = lsf.width_in_pixels(wave.view(), dlogl, 1.0).unwrap();
        assert_relative_eq!(wz[1], w0[1] / 2.0, max_relative = 1e-12);

        assert!(matches!(
            lsf.width_in_pixels(wave.view(), dlogl, -1.0),
            Err(IfuSimError::InvalidRedshift(_))
        ));
    }

    #[test]
    fn test_unusable_rows_are_filtered() {
        let (mut w, mut r, mut u) = calibration(60, 5);
        w[0] = f64::NAN;
        r[1] = -3.0;
        u[2] = -1.0;
        w[3] = 0.0;
        let lsf = LineSpreadFunction::fit(w.view(), r.view(), u.view(), &LsfFitConfig::default())
            .unwrap();
        assert!(lsf.resolution_at(6000.0).is_finite());

        let all_bad = Array1::from_elem(4, f64::NAN);
        assert!(matches!(
            LineSpreadFunction::fit(
                all_bad.view(),
                all_bad.view(),
                all_bad.view(),
                &LsfFitConfig::default()
            ),
            Err(IfuSimError::EmptyCalibration(4))
        ));
    }

    #[test]
    fn test_many_rows_are_binned() {
        let (w, r, u) = calibration(5000, 9);
        let config = LsfFitConfig {
            max_training_points: 80,
            ..LsfFitConfig::default()
        };
        let lsf = LineSpreadFunction::fit(w.view(), r.view(), u.view(), &config).unwrap();
        assert_relative_eq!(lsf.resolution_at(6500.0), true_resolution(6500.0), max_relative = 0.01);
        assert_eq!(lsf.n_calibration_rows(), 5000);
    }

    #[test]
    fn test_width_field_matches_direct_evaluation() {
        let lsf = fitted();
        let dlogl = 1.0e-4;
        let wave = Array3::from_shape_fn((2000, 2, 2), |(l, i, j)| {
            4000.0 * (1.0 + 0.01 * (i + j) as f64) * 10f64.powf(l as f64 * dlogl)
        });
        let field = lsf.width_field(wave.view(), dlogl, 0.0).unwrap();
        for &(l, i, j) in &[(0, 0, 0), (999, 1, 0), (1999, 1, 1)] {
            let direct = 1.0 / (dlogl * LN_10 * lsf.resolution_at(wave[[l, i, j]]));
            assert_relative_eq!(field[[l, i, j]], direct, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_covariance_kernel_shape() {
        let lsf = fitted();
        let wave = Array1::linspace(5000.0, 5050.0, 26);
        let dl = Array1::from_elem(26, 2.0);
        let k: Array2<f64> = lsf.covariance_kernel(wave.view(), dl.view()).unwrap();
        assert_eq!(k.dim(), (26, 26));
        for i in 0..26 {
            assert_relative_eq!(k[[i, i]], 1.0);
            for j in 0..26 {
                assert_relative_eq!(k[[i, j]], k[[j, i]], epsilon = 1e-15);
            }
        }
        assert!(k[[0, 1]] > k[[0, 5]]);
        assert!(k[[0, 25]] < 1e-3);
    }

    #[test]
    fn test_fit_from_cubes_requires_cubes() {
        assert!(matches!(
            LineSpreadFunction::fit_from_cubes(&[], &LsfFitConfig::default()),
            Err(IfuSimError::EmptyCalibration(0))
        ));
    }

    #[test]
    fn test_config_json_defaults() {
        let config: LsfFitConfig = serde_json::from_str(r#"{"max_training_points": 50}"#).unwrap();
        assert_eq!(config.max_training_points, 50);
        assert_eq!(config.n_length_scales, LsfFitConfig::default().n_length_scales);
    }
}
