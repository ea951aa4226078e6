//! Variable-width Gaussian convolution along the spectral axis
//!
//! Every output pixel `j` is blurred by its own Gaussian of standard deviation
//! `sig[j]` (in pixels). The kernel extends `p = ceil(3 · max(sig))` pixels on
//! each side, and the first and last `p` output pixels are not convolved: what
//! they hold is selected by [`EdgeMode`].
//!
//! The sum runs over the `2p + 1` kernel offsets, each offset processed as a
//! single whole-spectrum array operation, so the cost is O(n·p) with no
//! per-pixel kernel construction.

use ndarray::{
    s, Array, Array1, Array3, ArrayView, ArrayView1, ArrayView3, ArrayViewMut1, ArrayViewMut3, Axis,
    Dimension, Ix1, Zip,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

use crate::error::{IfuSimError, Result};
use crate::spectral::field::SpectrumOrField;
use crate::spectral::redshift::SPEED_OF_LIGHT_KMS;

/// Smallest kernel width (pixels) used once widths are clipped
pub const DEFAULT_WIDTH_FLOOR: f64 = 0.01;

/// What the `p` unconvolvable pixels at each end of a spectrum hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Boundary pixels are set to zero
    #[default]
    Zero,
    /// Boundary pixels keep their input value
    Passthrough,
}

/// Widths after flooring, with the number of samples that were raised
#[derive(Debug, Clone)]
pub struct ClippedWidths<D: Dimension = Ix1> {
    pub widths: Array<f64, D>,
    pub n_clipped: usize,
}

/// Kernel half-width `p = ceil(3 · max(sig))` for a width array.
///
/// The first and last `p` pixels of a convolved spectrum are boundary pixels.
pub fn kernel_half_width(sig: ArrayView1<f64>) -> usize {
    let max_sig = sig.iter().copied().fold(0.0_f64, f64::max);
    (3.0 * max_sig).ceil() as usize
}

/// Zero the first and last `p` samples of `lane`, the pixels a convolution
/// with widths `sig` leaves unconvolved. A lane shorter than `2p + 1` is
/// zeroed entirely.
pub fn zero_boundary(mut lane: ArrayViewMut1<f64>, sig: ArrayView1<f64>) {
    let n = lane.len();
    let p = kernel_half_width(sig).min(n);
    lane.slice_mut(s![..p]).fill(0.0);
    lane.slice_mut(s![n - p..]).fill(0.0);
}

/// [`zero_boundary`] for every spaxel of a (wavelength, row, col) cube.
pub fn zero_boundary_cube(mut cube: ArrayViewMut3<f64>, widths: &SpectrumOrField) -> Result<()> {
    let (nl, rows, cols) = cube.dim();
    widths.check_compatible("boundary widths", nl, (rows, cols))?;
    Zip::indexed(cube.lanes_mut(Axis(0))).par_for_each(|(i, j), lane| {
        zero_boundary(lane, widths.lane(i, j));
    });
    Ok(())
}

/// Check that every width is finite and strictly positive.
pub fn validate_widths(sig: ArrayView1<f64>) -> Result<()> {
    match sig
        .iter()
        .enumerate()
        .find(|(_, &w)| !(w.is_finite() && w > 0.0))
    {
        Some((index, &value)) => Err(IfuSimError::NonPositiveWidth { value, index }),
        None => Ok(()),
    }
}

/// Raise widths below `floor` (including NaN) to `floor`.
///
/// Works on a single spectrum's widths or on a whole width field.
pub fn clip_widths<D: Dimension>(sig: ArrayView<f64, D>, floor: f64) -> ClippedWidths<D> {
    let mut n_clipped = 0;
    let widths = sig.mapv(|w| {
        if w >= floor {
            w
        } else {
            n_clipped += 1;
            floor
        }
    });
    if n_clipped > 0 {
        log::debug!("Raised {n_clipped} kernel widths to the {floor} pixel floor");
    }
    ClippedWidths { widths, n_clipped }
}

/// Convolve one spectrum with a Gaussian of per-pixel width `sig`.
///
/// # Arguments
/// * `spec` - Input spectrum of length `n`
/// * `sig` - Gaussian standard deviation per output pixel, in pixels
/// * `edge` - What the first/last `p` output pixels hold
///
/// # Errors
/// * `ShapeMismatch` if `sig` and `spec` differ in length
/// * `NonPositiveWidth` if any width is zero, negative or non-finite
pub fn gaussian_filter(
    spec: ArrayView1<f64>,
    sig: ArrayView1<f64>,
    edge: EdgeMode,
) -> Result<Array1<f64>> {
    if spec.len() != sig.len() {
        return Err(IfuSimError::shape_mismatch(
            "gaussian_filter widths",
            &[spec.len()],
            &[sig.len()],
        ));
    }
    validate_widths(sig)?;

    let mut out = Array1::zeros(spec.len());
    convolve_lane(spec, sig, edge, out.view_mut());
    Ok(out)
}

/// Convolve every spaxel of a (wavelength, row, col) cube.
///
/// Widths are either shared by all spaxels or given per spaxel; spaxels are
/// processed in parallel.
pub fn convolve_cube(
    cube: ArrayView3<f64>,
    widths: &SpectrumOrField,
    edge: EdgeMode,
) -> Result<Array3<f64>> {
    let (nl, rows, cols) = cube.dim();
    widths.check_compatible("convolution widths", nl, (rows, cols))?;
    match widths {
        SpectrumOrField::Uniform(sig) => validate_widths(sig.view())?,
        SpectrumOrField::Field(sig) => {
            if let Some((index, &value)) = sig
                .iter()
                .enumerate()
                .find(|(_, &w)| !(w.is_finite() && w > 0.0))
            {
                return Err(IfuSimError::NonPositiveWidth { value, index });
            }
        }
    }

    let mut out = Array3::zeros((nl, rows, cols));
    Zip::indexed(out.lanes_mut(Axis(0)))
        .and(cube.lanes(Axis(0)))
        .par_for_each(|(i, j), out_lane, spec_lane| {
            convolve_lane(spec_lane, widths.lane(i, j), edge, out_lane);
        });

    Ok(out)
}

/// Per-pixel Gaussian widths for a line-of-sight velocity dispersion.
///
/// The dispersion `sigma_kms` becomes `(σ/c) / (dlogl · ln 10)` pixels on a
/// log10 grid of step `dlogl`, is added in quadrature to the instrumental
/// widths `lsf_widths`, and is floored at `floor`.
pub fn velocity_dispersion_widths(
    sigma_kms: f64,
    dlogl: f64,
    lsf_widths: ArrayView1<f64>,
    floor: f64,
) -> Result<Array1<f64>> {
    if !(sigma_kms.is_finite() && sigma_kms >= 0.0) {
        return Err(IfuSimError::invalid(
            "sigma_kms",
            format!("must be finite and non-negative, got {sigma_kms}"),
        ));
    }
    if !(dlogl.is_finite() && dlogl > 0.0) {
        return Err(IfuSimError::invalid(
            "dlogl",
            format!("must be finite and positive, got {dlogl}"),
        ));
    }

    let sig_v = (sigma_kms / SPEED_OF_LIGHT_KMS) / (dlogl * LN_10);
    Ok(lsf_widths.mapv(|w| (sig_v * sig_v + w * w).sqrt().max(floor)))
}

/// Blur a spectrum by a velocity dispersion on top of the instrumental LSF.
pub fn broaden_by_velocity_dispersion(
    spec: ArrayView1<f64>,
    dlogl: f64,
    sigma_kms: f64,
    lsf_widths: ArrayView1<f64>,
    edge: EdgeMode,
) -> Result<Array1<f64>> {
    let sig = velocity_dispersion_widths(sigma_kms, dlogl, lsf_widths, DEFAULT_WIDTH_FLOOR)?;
    gaussian_filter(spec, sig.view(), edge)
}

/// Convolution of a single lane; widths must already be validated.
fn convolve_lane(
    spec: ArrayView1<f64>,
    sig: ArrayView1<f64>,
    edge: EdgeMode,
    mut out: ArrayViewMut1<f64>,
) {
    match edge {
        EdgeMode::Zero => out.fill(0.0),
        EdgeMode::Passthrough => out.assign(&spec),
    }

    let n = spec.len();
    let p = kernel_half_width(sig);
    if n < 2 * p + 1 {
        return;
    }
    let interior = n - 2 * p;

    let inv_two_var = sig.slice(s![p..n - p]).mapv(|w| 1.0 / (2.0 * w * w));
    let mut acc = Array1::<f64>::zeros(interior);
    let mut norm = Array1::<f64>::zeros(interior);

    for k in 0..=2 * p {
        let offset = k as f64 - p as f64;
        let d2 = offset * offset;
        Zip::from(&mut acc)
            .and(&mut norm)
            .and(&inv_two_var)
            .and(spec.slice(s![k..k + interior]))
            .for_each(|a, w_sum, &c, &x| {
                let w = (-d2 * c).exp();
                *a += w * x;
                *w_sum += w;
            });
    }

    // The zero-offset weight is 1, so the normaliser is never below 1
    out.slice_mut(s![p..n - p]).assign(&(acc / &norm));
}
