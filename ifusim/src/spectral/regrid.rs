//! Integer-pixel and inverse-distance-weighted regridding onto a log grid.
//!
//! A source spectrum whose log10 wavelengths have the same step as the target
//! grid (typically a log-sampled model after redshifting) differs from the
//! target only by a shift. The shift is split into a whole number of pixels
//! and a residual `dlogl_resid`, measured at the target's reference pixel
//! `(N - 1) / 2`:
//!
//! - **nearest** copies source pixel `ix_ref_src + (t - ix_ref_grid)` into
//!   target pixel `t`, ignoring the residual;
//! - **invdistwt** regrids onto a grid expanded by one pixel on each side and
//!   then blends each target pixel from the two source samples that bracket
//!   it, with inverse-distance weights.
//!
//! The reference source pixel is found from the actual wavelength offset, so
//! a source that only partly overlaps the target (or misses it entirely, as
//! for a very large redshift) lands at its true wavelengths. Target pixels
//! with no source sample get zero flux and zero inverse variance. Pixels
//! without a sample or whose sample carries no inverse variance are marked
//! as not covered.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};
use shared::algo::nearest_index;
use std::fmt;
use std::str::FromStr;

use crate::error::{IfuSimError, Result};
use crate::spectral::field::{ensure_same_shape, map_shape, SpectrumOrField};
use crate::spectral::grid::LogWavelengthGrid;

/// Inverse variance floor applied before variances are summed
const IVAR_FLOOR: f64 = 1.0e-4;

/// Largest tolerated relative difference between source and target steps
pub(crate) const STEP_TOLERANCE: f64 = 1.0e-3;

/// How spectra are placed on the target grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegridStrategy {
    #[serde(rename = "nearest")]
    Nearest,
    /// Blend of the two bracketing samples with weights `w_l + w_r = 1`.
    ///
    /// The variance is propagated as `w_l²/ivar_l + w_r²/ivar_r`, not as the
    /// unweighted `1/ivar_l + 1/ivar_r`, so at zero residual the result
    /// equals [`RegridStrategy::Nearest`] in both flux and ivar.
    #[default]
    #[serde(rename = "invdistwt")]
    InverseDistanceWeighted,
    /// Reserved
    #[serde(rename = "interp")]
    Interp,
    /// Reserved
    #[serde(rename = "supersample")]
    Supersample,
}

impl RegridStrategy {
    pub fn name(self) -> &'static str {
        match self {
            RegridStrategy::Nearest => "nearest",
            RegridStrategy::InverseDistanceWeighted => "invdistwt",
            RegridStrategy::Interp => "interp",
            RegridStrategy::Supersample => "supersample",
        }
    }

    pub fn is_implemented(self) -> bool {
        matches!(
            self,
            RegridStrategy::Nearest | RegridStrategy::InverseDistanceWeighted
        )
    }
}

impl FromStr for RegridStrategy {
    type Err = IfuSimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nearest" => Ok(RegridStrategy::Nearest),
            "invdistwt" => Ok(RegridStrategy::InverseDistanceWeighted),
            "interp" => Ok(RegridStrategy::Interp),
            "supersample" => Ok(RegridStrategy::Supersample),
            other => Err(IfuSimError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for RegridStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Regridded cubes on the target grid
#[derive(Debug, Clone)]
pub struct RegridResult {
    /// (target wavelength, row, col)
    pub flux: Array3<f64>,
    pub ivar: Array3<f64>,
    /// True where the target pixel was built from in-range source samples
    /// carrying inverse variance
    pub covered: Array3<bool>,
    /// Source minus target log10 wavelength at the reference pixel, per spaxel
    pub dlogl_resid: Array2<f64>,
}

impl RegridResult {
    /// Number of target pixels without source coverage
    pub fn n_uncovered(&self) -> usize {
        self.covered.iter().filter(|&&c| !c).count()
    }
}

/// Regridding of a single spectrum
#[derive(Debug, Clone)]
pub struct RegridSpectrum {
    pub flux: Array1<f64>,
    pub ivar: Array1<f64>,
    pub covered: Array1<bool>,
    pub dlogl_resid: f64,
}

/// Places spectra onto one target log-wavelength grid
#[derive(Debug, Clone)]
pub struct Regridder {
    grid: LogWavelengthGrid,
    expanded: LogWavelengthGrid,
    strategy: RegridStrategy,
}

impl Regridder {
    pub fn new(grid: LogWavelengthGrid, strategy: RegridStrategy) -> Self {
        let expanded = grid.expanded();
        Self {
            grid,
            expanded,
            strategy,
        }
    }

    pub fn grid(&self) -> &LogWavelengthGrid {
        &self.grid
    }

    pub fn strategy(&self) -> RegridStrategy {
        self.strategy
    }

    /// Regrid every spaxel of a cube.
    ///
    /// # Arguments
    /// * `src_logl` - log10 source wavelengths, shared or per spaxel
    /// * `flux`, `ivar` - Source cubes indexed (source wavelength, row, col)
    ///
    /// # Errors
    /// * `UnsupportedStrategy` for the reserved strategies
    /// * `ShapeMismatch` for inconsistent inputs
    /// * `IrregularGrid` if a source grid is non-finite, descending, or has a
    ///   step different from the target's
    /// * `NegativeInverseVariance` if any source ivar is negative
    pub fn regrid(
        &self,
        src_logl: &SpectrumOrField,
        flux: ArrayView3<f64>,
        ivar: ArrayView3<f64>,
    ) -> Result<RegridResult> {
        self.check_strategy()?;
        ensure_same_shape("regrid ivar", &flux, &ivar)?;
        let n_src = flux.len_of(Axis(0));
        let (rows, cols) = map_shape(&flux);
        src_logl.check_compatible("regrid source grid", n_src, (rows, cols))?;
        if n_src == 0 {
            return Err(IfuSimError::EmptyInput("regrid source spectra"));
        }
        match src_logl {
            SpectrumOrField::Uniform(logl) => self.check_source_grid(logl.view())?,
            SpectrumOrField::Field(logl) => {
                for lane in logl.lanes(Axis(0)) {
                    self.check_source_grid(lane)?;
                }
            }
        }
        if let Some((index, &value)) = ivar.iter().enumerate().find(|(_, &v)| v < 0.0) {
            return Err(IfuSimError::NegativeInverseVariance { value, index });
        }

        let n = self.grid.len();
        let mut out_flux = Array3::zeros((n, rows, cols));
        let mut out_ivar = Array3::zeros((n, rows, cols));
        let mut covered = Array3::from_elem((n, rows, cols), false);
        let mut dlogl_resid = Array2::zeros((rows, cols));

        Zip::indexed(out_flux.lanes_mut(Axis(0)))
            .and(out_ivar.lanes_mut(Axis(0)))
            .and(covered.lanes_mut(Axis(0)))
            .and(&mut dlogl_resid)
            .par_for_each(|(i, j), f_out, iv_out, cov_out, resid| {
                let src = src_logl.lane(i, j).to_vec();
                *resid = self.regrid_lane(
                    &src,
                    flux.slice(s![.., i, j]),
                    ivar.slice(s![.., i, j]),
                    f_out,
                    iv_out,
                    cov_out,
                );
            });

        let result = RegridResult {
            flux: out_flux,
            ivar: out_ivar,
            covered,
            dlogl_resid,
        };
        let n_uncovered = result.n_uncovered();
        if n_uncovered > 0 {
            log::debug!(
                "{} regridding left {n_uncovered} of {} target pixels uncovered",
                self.strategy,
                result.covered.len()
            );
        }
        Ok(result)
    }

    /// Regrid one spectrum; see [`Regridder::regrid`].
    pub fn regrid_spectrum(
        &self,
        src_logl: ArrayView1<f64>,
        flux: ArrayView1<f64>,
        ivar: ArrayView1<f64>,
    ) -> Result<RegridSpectrum> {
        let n_src = src_logl.len();
        let as_cube = |a: ArrayView1<f64>| a.to_owned().into_shape_with_order((n_src, 1, 1));
        if flux.len() != n_src || ivar.len() != n_src {
            return Err(IfuSimError::shape_mismatch(
                "regrid_spectrum",
                &[n_src, n_src],
                &[flux.len(), ivar.len()],
            ));
        }
        let flux = as_cube(flux).map_err(|e| IfuSimError::Numerical(e.to_string()))?;
        let ivar = as_cube(ivar).map_err(|e| IfuSimError::Numerical(e.to_string()))?;

        let result = self.regrid(
            &SpectrumOrField::Uniform(src_logl.to_owned()),
            flux.view(),
            ivar.view(),
        )?;
        let lane = |a: &Array3<f64>| a.index_axis(Axis(2), 0).index_axis(Axis(1), 0).to_owned();
        Ok(RegridSpectrum {
            flux: lane(&result.flux),
            ivar: lane(&result.ivar),
            covered: result
                .covered
                .index_axis(Axis(2), 0)
                .index_axis(Axis(1), 0)
                .to_owned(),
            dlogl_resid: result.dlogl_resid[[0, 0]],
        })
    }

    fn check_strategy(&self) -> Result<()> {
        if self.strategy.is_implemented() {
            Ok(())
        } else {
            Err(IfuSimError::UnsupportedStrategy(self.strategy.name().to_string()))
        }
    }

    fn check_source_grid(&self, logl: ArrayView1<f64>) -> Result<()> {
        if logl.iter().any(|v| !v.is_finite()) {
            return Err(IfuSimError::IrregularGrid(
                "source grid contains non-finite values".to_string(),
            ));
        }
        let n = logl.len();
        if n < 2 {
            return Ok(());
        }
        let step = (logl[n - 1] - logl[0]) / (n - 1) as f64;
        let target = self.grid.dlogl();
        if (step - target).abs() > STEP_TOLERANCE * target {
            return Err(IfuSimError::IrregularGrid(format!(
                "source step {step:e} does not match target step {target:e}"
            )));
        }
        Ok(())
    }

    /// Fill one output lane and return the reference residual.
    fn regrid_lane(
        &self,
        src_logl: &[f64],
        flux: ArrayView1<f64>,
        ivar: ArrayView1<f64>,
        mut f_out: ArrayViewMut1<f64>,
        mut iv_out: ArrayViewMut1<f64>,
        mut cov_out: ArrayViewMut1<bool>,
    ) -> f64 {
        match self.strategy {
            RegridStrategy::Nearest => {
                let lane = nearest(
                    self.grid.log_values(),
                    self.grid.dlogl(),
                    src_logl,
                    flux,
                    ivar,
                );
                f_out.assign(&lane.flux);
                iv_out.assign(&lane.ivar);
                cov_out.assign(&lane.covered);
                lane.resid
            }
            _ => {
                let lane = nearest(
                    self.expanded.log_values(),
                    self.grid.dlogl(),
                    src_logl,
                    flux,
                    ivar,
                );
                let fpix = (lane.resid.abs() / self.grid.dlogl()).min(1.0);
                let redward = lane.resid >= 0.0;

                for t in 0..self.grid.len() {
                    // Expanded-grid pixels bracketing target pixel t, with
                    // weights proportional to the distance to the far sample
                    let (l, r, w_l, w_r) = if redward {
                        (t, t + 1, fpix, 1.0 - fpix)
                    } else {
                        (t + 1, t + 2, 1.0 - fpix, fpix)
                    };

                    f_out[t] = w_l * lane.flux[l] + w_r * lane.flux[r];

                    let mut usable = true;
                    let mut variance = 0.0;
                    for (k, w) in [(l, w_l), (r, w_r)] {
                        if w > 0.0 {
                            usable &= lane.covered[k] && lane.ivar[k] > 0.0;
                            variance += w * w / lane.ivar[k].max(IVAR_FLOOR);
                        }
                    }
                    let iv = 1.0 / variance;
                    iv_out[t] = if usable && iv.is_finite() { iv } else { 0.0 };
                    cov_out[t] = usable;
                }
                lane.resid
            }
        }
    }
}

/// Integer-pixel placement of one source lane onto `target`
struct NearestLane {
    flux: Array1<f64>,
    ivar: Array1<f64>,
    covered: Array1<bool>,
    resid: f64,
}

fn nearest(
    target: ArrayView1<f64>,
    dlogl: f64,
    src_logl: &[f64],
    flux: ArrayView1<f64>,
    ivar: ArrayView1<f64>,
) -> NearestLane {
    let n = target.len();
    let mut lane = NearestLane {
        flux: Array1::zeros(n),
        ivar: Array1::zeros(n),
        covered: Array1::from_elem(n, false),
        resid: 0.0,
    };
    let n_src = src_logl.len();
    if n == 0 || n_src == 0 {
        return lane;
    }

    // Source pixel at the target's reference wavelength, extrapolated with
    // the source step when that wavelength lies outside the source grid
    let ix_ref_grid = (n - 1) / 2;
    let reference = target[ix_ref_grid];
    let step = if n_src > 1 {
        (src_logl[n_src - 1] - src_logl[0]) / (n_src - 1) as f64
    } else {
        dlogl
    };
    let position = (reference - src_logl[0]) / step;
    let ix_ref_src = if (-0.5..=n_src as f64 - 0.5).contains(&position) {
        match nearest_index(src_logl, reference) {
            Some(ix) => ix as f64,
            None => return lane,
        }
    } else if position.is_finite() {
        position.round()
    } else {
        return lane;
    };
    lane.resid = if ix_ref_src >= 0.0 && ix_ref_src < n_src as f64 {
        src_logl[ix_ref_src as usize] - reference
    } else {
        src_logl[0] + ix_ref_src * step - reference
    };

    // Beyond this the two grids cannot overlap
    let reach = (n + n_src) as f64;
    if ix_ref_src.abs() > reach {
        return lane;
    }
    let shift = ix_ref_src as isize - ix_ref_grid as isize;
    for t in 0..n {
        let s = t as isize + shift;
        if s < 0 || s >= n_src as isize {
            continue;
        }
        let s = s as usize;
        let f = flux[s];
        if !f.is_finite() {
            continue;
        }
        let iv = if ivar[s].is_finite() { ivar[s] } else { 0.0 };
        lane.flux[t] = f;
        lane.ivar[t] = iv;
        lane.covered[t] = iv > 0.0;
    }
    lane
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    const DLOGL: f64 = 1.0e-4;

    fn target(n: usize) -> LogWavelengthGrid {
        LogWavelengthGrid::new(3.6, DLOGL, n).unwrap()
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for name in ["nearest", "invdistwt", "interp", "supersample"] {
            let strategy: RegridStrategy = name.parse().unwrap();
            assert_eq!(strategy.name(), name);
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json, format!("\"{name}\""));
        }
        assert!(matches!(
            "cubic".parse::<RegridStrategy>(),
            Err(IfuSimError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_reserved_strategies_are_unsupported() {
        let grid = target(10);
        let logl = grid.log_values().to_owned();
        let flux = Array1::ones(10);
        for strategy in [RegridStrategy::Interp, RegridStrategy::Supersample] {
            let regridder = Regridder::new(grid.clone(), strategy);
            assert!(matches!(
                regridder.regrid_spectrum(logl.view(), flux.view(), flux.view()),
                Err(IfuSimError::UnsupportedStrategy(_))
            ));
        }
    }

    #[test]
    fn test_nearest_identity_on_same_grid() {
        let grid = target(31);
        let logl = grid.log_values().to_owned();
        let flux = Array1::from_shape_fn(31, |i| i as f64 + 1.0);
        let ivar = Array1::from_shape_fn(31, |i| 0.5 + i as f64);

        let out = Regridder::new(grid, RegridStrategy::Nearest)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        assert_eq!(out.flux, flux);
        assert_eq!(out.ivar, ivar);
        assert!(out.covered.iter().all(|&c| c));
        assert_relative_eq!(out.dlogl_resid, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_shift_zero_fills_out_of_range() {
        let grid = target(20);
        // Source starts three pixels redward of the target
        let logl = Array1::from_shape_fn(20, |i| 3.6 + (i as f64 + 3.0) * DLOGL);
        let flux = Array1::from_shape_fn(20, |i| 10.0 + i as f64);
        let ivar = Array1::ones(20);

        let out = Regridder::new(grid, RegridStrategy::Nearest)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        assert_eq!(out.flux.len(), 20);
        assert_eq!(out.flux[3], 10.0);
        assert_eq!(out.flux[19], 26.0);
        for t in 0..3 {
            assert_eq!(out.flux[t], 0.0);
            assert_eq!(out.ivar[t], 0.0);
            assert!(!out.covered[t]);
        }
    }

    /// Source spectrum whose flux is its own position in target pixels
    fn pixel_coordinate_source(n_src: usize, start_px: f64) -> (Array1<f64>, Array1<f64>) {
        let logl = Array1::from_shape_fn(n_src, |i| 3.6 + (start_px + i as f64) * DLOGL);
        let flux = logl.mapv(|l| (l - 3.6) / DLOGL);
        (logl, flux)
    }

    #[test]
    fn test_disjoint_source_covers_nothing() {
        let (logl, flux) = pixel_coordinate_source(20, 100.0);
        let ivar = Array1::<f64>::ones(20);
        for strategy in [RegridStrategy::Nearest, RegridStrategy::InverseDistanceWeighted] {
            let out = Regridder::new(target(40), strategy)
                .regrid_spectrum(logl.view(), flux.view(), ivar.view())
                .unwrap();
            assert!(out.covered.iter().all(|&c| !c), "{strategy}");
            assert!(out.ivar.iter().all(|&v| v == 0.0), "{strategy}");
            assert!(out.flux.iter().all(|&f| f == 0.0), "{strategy}");
        }
    }

    #[test]
    fn test_partial_overlap_lands_at_true_wavelengths() {
        // Source starts at target pixel 30.3, so the reference pixel 19 is
        // outside it
        let (logl, flux) = pixel_coordinate_source(20, 30.3);
        let ivar = Array1::<f64>::ones(20);

        let near = Regridder::new(target(40), RegridStrategy::Nearest)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        assert_relative_eq!(near.dlogl_resid / DLOGL, 0.3, epsilon = 1e-6);
        for t in 0..40 {
            assert_eq!(near.covered[t], t >= 30, "pixel {t}");
        }
        assert_relative_eq!(near.flux[30], 30.3, epsilon = 1e-6);
        assert_relative_eq!(near.flux[39], 39.3, epsilon = 1e-6);

        let idw = Regridder::new(target(40), RegridStrategy::InverseDistanceWeighted)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        assert!(idw.covered.iter().any(|&c| c));
        for t in 0..40 {
            if idw.covered[t] {
                assert!(t >= 30, "pixel {t}");
                assert_relative_eq!(idw.flux[t], t as f64, epsilon = 1e-6);
            } else {
                assert_eq!(idw.ivar[t], 0.0);
            }
        }
    }

    #[test]
    fn test_cube_with_extreme_shift_masks_out_of_range() {
        let n_src = 40;
        // Offsets of the first source sample in target pixels; one spaxel is
        // redshifted far beyond the target grid
        let starts = [[0.3, 10000.4], [-25.2, 7.6]];
        let logl = Array3::from_shape_fn((n_src, 2, 2), |(l, i, j)| {
            3.6 + (l as f64 + starts[i][j]) * DLOGL
        });
        let flux = logl.mapv(|l| (l - 3.6) / DLOGL);
        let ivar = Array3::<f64>::ones((n_src, 2, 2));
        let field = SpectrumOrField::Field(logl);

        let near = Regridder::new(target(40), RegridStrategy::Nearest)
            .regrid(&field, flux.view(), ivar.view())
            .unwrap();
        let idw = Regridder::new(target(40), RegridStrategy::InverseDistanceWeighted)
            .regrid(&field, flux.view(), ivar.view())
            .unwrap();

        let expected_covered = [[40, 0], [15, 32]];
        for ((t, i, j), &covered) in near.covered.indexed_iter() {
            if covered {
                // Within half a pixel of the target wavelength
                assert!((near.flux[[t, i, j]] - t as f64).abs() <= 0.5 + 1e-6);
            } else {
                assert_eq!(near.ivar[[t, i, j]], 0.0);
            }
        }
        for ((t, i, j), &covered) in idw.covered.indexed_iter() {
            if covered {
                assert_relative_eq!(idw.flux[[t, i, j]], t as f64, epsilon = 1e-6);
            } else {
                assert_eq!(idw.ivar[[t, i, j]], 0.0);
            }
        }
        for i in 0..2 {
            for j in 0..2 {
                let n = near.covered.slice(s![.., i, j]).iter().filter(|&&c| c).count();
                assert_eq!(n, expected_covered[i][j], "spaxel ({i}, {j})");
            }
        }
        assert!(idw.covered.slice(s![.., 0, 1]).iter().all(|&c| !c));
        assert!(near.dlogl_resid.iter().all(|r| r.abs() <= 0.5 * DLOGL + 1e-9));
    }

    #[test]
    fn test_invdistwt_matches_nearest_at_zero_residual() {
        let grid = target(40);
        let logl = Array1::from_shape_fn(60, |i| 3.6 + (i as f64 - 10.0) * DLOGL);
        let flux = Array1::from_shape_fn(60, |i| (i as f64 * 0.3).sin() + 2.0);
        let ivar = Array1::from_elem(60, 4.0);

        let near = Regridder::new(grid.clone(), RegridStrategy::Nearest)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        let idw = Regridder::new(grid, RegridStrategy::InverseDistanceWeighted)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        for t in 0..40 {
            assert_relative_eq!(idw.flux[t], near.flux[t], epsilon = 1e-12);
            assert_relative_eq!(idw.ivar[t], near.ivar[t], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_invdistwt_recovers_linear_spectrum_with_subpixel_shift() {
        let grid = target(30);
        for frac in [0.3, -0.3] {
            let logl = Array1::from_shape_fn(50, |i| 3.6 + (i as f64 - 10.0 + frac) * DLOGL);
            // Linear in log wavelength, so blending two neighbours is exact
            let flux = logl.mapv(|l| 1.0 + (l - 3.6) / DLOGL);
            let ivar = Array1::from_elem(50, 1.0);

            let out = Regridder::new(grid.clone(), RegridStrategy::InverseDistanceWeighted)
                .regrid_spectrum(logl.view(), flux.view(), ivar.view())
                .unwrap();
            assert_relative_eq!(out.dlogl_resid / DLOGL, frac, epsilon = 1e-6);
            for t in 0..30 {
                assert_relative_eq!(out.flux[t], 1.0 + t as f64, epsilon = 1e-6);
                // Two unit-ivar samples with weights 0.3/0.7
                assert_relative_eq!(out.ivar[t], 1.0 / (0.09 + 0.49), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_invdistwt_zero_ivar_neighbour_propagates() {
        let grid = target(10);
        let logl = Array1::from_shape_fn(10, |i| 3.6 + (i as f64 + 0.25) * DLOGL);
        let flux = Array1::ones(10);
        let mut ivar = Array1::ones(10);
        ivar[4] = 0.0;

        let out = Regridder::new(grid, RegridStrategy::InverseDistanceWeighted)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        // Source pixel 4 feeds target pixels 4 and 5
        assert_eq!(out.ivar[4], 0.0);
        assert_eq!(out.ivar[5], 0.0);
        assert!(out.ivar[3] > 0.0);
        assert!(out.ivar[6] > 0.0);
        // The blueward edge has no left neighbour
        assert_eq!(out.ivar[0], 0.0);
    }

    #[test]
    fn test_non_finite_source_is_no_information() {
        let grid = target(8);
        let logl = grid.log_values().to_owned();
        let mut flux = Array1::ones(8);
        flux[2] = f64::NAN;
        let mut ivar = Array1::ones(8);
        ivar[5] = f64::INFINITY;
        ivar[6] = f64::NAN;

        let out = Regridder::new(grid, RegridStrategy::Nearest)
            .regrid_spectrum(logl.view(), flux.view(), ivar.view())
            .unwrap();
        assert_eq!(out.flux[2], 0.0);
        assert_eq!(out.ivar[2], 0.0);
        assert!(!out.covered[2]);
        assert_eq!(out.ivar[5], 0.0);
        assert_eq!(out.ivar[6], 0.0);
    }

    #[test]
    fn test_cube_with_per_spaxel_grids() {
        let grid = target(25);
        let n_src = 40;
        let shifts = [[0.0, 2.0], [-1.0, 5.0]];
        let logl = Array3::from_shape_fn((n_src, 2, 2), |(l, i, j)| {
            3.6 + (l as f64 - 5.0 + shifts[i][j]) * DLOGL
        });
        let flux = Array3::from_shape_fn((n_src, 2, 2), |(l, i, j)| l as f64 + 100.0 * (i + j) as f64);
        let ivar = Array3::ones((n_src, 2, 2));

        let out = Regridder::new(grid, RegridStrategy::Nearest)
            .regrid(&SpectrumOrField::Field(logl), flux.view(), ivar.view())
            .unwrap();
        assert_eq!(out.flux.dim(), (25, 2, 2));
        // Target pixel 0 reads source pixel 5 - shift
        assert_eq!(out.flux[[0, 0, 0]], 5.0);
        assert_eq!(out.flux[[0, 0, 1]], 103.0);
        assert_eq!(out.flux[[0, 1, 0]], 106.0);
        assert_eq!(out.flux[[0, 1, 1]], 200.0);
        assert_eq!(out.n_uncovered(), 0);
    }

    #[test]
    fn test_mismatched_step_is_rejected() {
        let grid = target(10);
        let logl = Array1::from_shape_fn(10, |i| 3.6 + i as f64 * 2.0 * DLOGL);
        let flux = Array1::ones(10);
        assert!(matches!(
            Regridder::new(grid, RegridStrategy::Nearest).regrid_spectrum(
                logl.view(),
                flux.view(),
                flux.view()
            ),
            Err(IfuSimError::IrregularGrid(_))
        ));
    }

    #[test]
    fn test_negative_ivar_is_rejected() {
        let grid = target(5);
        let logl = grid.log_values().to_owned();
        let flux = Array1::ones(5);
        let mut ivar = Array1::ones(5);
        ivar[1] = -1.0;
        assert!(matches!(
            Regridder::new(grid, RegridStrategy::Nearest).regrid_spectrum(
                logl.view(),
                flux.view(),
                ivar.view()
            ),
            Err(IfuSimError::NegativeInverseVariance { .. })
        ));
    }
}
