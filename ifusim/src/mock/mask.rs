//! Final masking of a mock cube

use ndarray::{Array3, ArrayView2, Axis, Zip};

use crate::error::{IfuSimError, Result};
use crate::noise::snr::median_filter_cube;

/// What the masking step changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskSummary {
    /// Spaxels outside the broad-band footprint, zeroed
    pub n_outside_footprint: usize,
    /// Spaxels whose velocity was unusable, given zero ivar
    pub n_invalid_velocity: usize,
    /// Non-finite flux pixels replaced by the running median
    pub n_filled_flux: usize,
    /// Non-finite ivar pixels set to zero
    pub n_zeroed_ivar: usize,
}

impl MaskSummary {
    pub fn n_masked_spaxels(&self) -> usize {
        self.n_outside_footprint + self.n_invalid_velocity
    }
}

/// Mask a finished mock in place.
///
/// In order: spaxels with `r_image == 0` get zero flux, zero flux gets zero
/// ivar, spaxels with an invalid velocity get zero ivar, non-finite flux is
/// replaced by a running median of the cube (non-finite values read as 0),
/// and non-finite ivar becomes 0.
pub fn apply_mask(
    flux: &mut Array3<f64>,
    ivar: &mut Array3<f64>,
    r_image: ArrayView2<f64>,
    velocity_valid: ArrayView2<bool>,
    median_window: usize,
) -> Result<MaskSummary> {
    let (_, rows, cols) = flux.dim();
    if ivar.dim() != flux.dim() {
        return Err(IfuSimError::shape_mismatch(
            "mask ivar",
            flux.shape(),
            ivar.shape(),
        ));
    }
    for (context, shape) in [
        ("mask r-band image", r_image.shape()),
        ("mask velocity validity", velocity_valid.shape()),
    ] {
        if shape != [rows, cols] {
            return Err(IfuSimError::shape_mismatch(context, &[rows, cols], shape));
        }
    }

    let mut summary = MaskSummary::default();

    Zip::from(flux.lanes_mut(Axis(0)))
        .and(&r_image)
        .for_each(|mut lane, &r| {
            if r == 0.0 {
                lane.fill(0.0);
                summary.n_outside_footprint += 1;
            }
        });

    Zip::from(&mut *ivar).and(&*flux).par_for_each(|v, &f| {
        if f == 0.0 {
            *v = 0.0;
        }
    });

    Zip::from(ivar.lanes_mut(Axis(0)))
        .and(&velocity_valid)
        .for_each(|mut lane, &ok| {
            if !ok {
                lane.fill(0.0);
                summary.n_invalid_velocity += 1;
            }
        });

    summary.n_filled_flux = flux.iter().filter(|f| !f.is_finite()).count();
    if summary.n_filled_flux > 0 {
        let finite = flux.mapv(|f| if f.is_finite() { f } else { 0.0 });
        let smoothed = median_filter_cube(finite.view(), median_window)?;
        Zip::from(&mut *flux).and(&smoothed).par_for_each(|f, &m| {
            if !f.is_finite() {
                *f = m;
            }
        });
    }

    ivar.mapv_inplace(|v| {
        if v.is_finite() {
            v
        } else {
            summary.n_zeroed_ivar += 1;
            0.0
        }
    });

    if summary.n_filled_flux > 0 || summary.n_zeroed_ivar > 0 {
        log::debug!(
            "Masking filled {} flux and zeroed {} ivar pixels",
            summary.n_filled_flux,
            summary.n_zeroed_ivar
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, s, Array2};

    #[test]
    fn test_footprint_and_velocity_masks() {
        let mut flux = Array3::from_elem((5, 2, 2), 2.0);
        let mut ivar = Array3::from_elem((5, 2, 2), 4.0);
        let r_image = array![[1.0, 0.0], [1.0, 1.0]];
        let valid = array![[true, true], [false, true]];

        let summary = apply_mask(&mut flux, &mut ivar, r_image.view(), valid.view(), 11).unwrap();

        assert_eq!(summary.n_outside_footprint, 1);
        assert_eq!(summary.n_invalid_velocity, 1);
        assert_eq!(summary.n_masked_spaxels(), 2);
        assert!(flux.slice(s![.., 0, 1]).iter().all(|&f| f == 0.0));
        assert!(ivar.slice(s![.., 0, 1]).iter().all(|&v| v == 0.0));
        assert!(ivar.slice(s![.., 1, 0]).iter().all(|&v| v == 0.0));
        assert!(flux.slice(s![.., 1, 0]).iter().all(|&f| f == 2.0));
        assert!(ivar.slice(s![.., 1, 1]).iter().all(|&v| v == 4.0));
    }

    #[test]
    fn test_zero_flux_pixels_lose_ivar() {
        let mut flux = Array3::from_elem((4, 1, 1), 1.0);
        flux[[2, 0, 0]] = 0.0;
        let mut ivar = Array3::ones((4, 1, 1));
        apply_mask(
            &mut flux,
            &mut ivar,
            Array2::ones((1, 1)).view(),
            Array2::from_elem((1, 1), true).view(),
            3,
        )
        .unwrap();
        assert_eq!(ivar.slice(s![.., 0, 0]).to_vec(), vec![1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_non_finite_values_are_repaired() {
        let mut flux = Array3::from_elem((21, 1, 1), 3.0);
        flux[[10, 0, 0]] = f64::NAN;
        flux[[11, 0, 0]] = f64::INFINITY;
        let mut ivar = Array3::ones((21, 1, 1));
        ivar[[4, 0, 0]] = f64::NAN;

        let summary = apply_mask(
            &mut flux,
            &mut ivar,
            Array2::ones((1, 1)).view(),
            Array2::from_elem((1, 1), true).view(),
            11,
        )
        .unwrap();

        assert_eq!(summary.n_filled_flux, 2);
        assert_eq!(summary.n_zeroed_ivar, 1);
        assert_eq!(flux[[10, 0, 0]], 3.0);
        assert_eq!(flux[[11, 0, 0]], 3.0);
        assert_eq!(ivar[[4, 0, 0]], 0.0);
    }

    #[test]
    fn test_shape_checks() {
        let mut flux = Array3::zeros((3, 2, 2));
        let mut ivar = Array3::zeros((3, 2, 2));
        let err = apply_mask(
            &mut flux,
            &mut ivar,
            Array2::ones((2, 3)).view(),
            Array2::from_elem((2, 2), true).view(),
            11,
        );
        assert!(matches!(err, Err(IfuSimError::ShapeMismatch { .. })));
    }
}
