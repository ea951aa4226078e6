//! Band photometry and flux normalisation of mock cubes

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};

use crate::error::{IfuSimError, Result};

/// Integrated flux of every spaxel through some photometric band
pub trait BandPhotometry: Send + Sync {
    /// Band flux map (row, col) of a (wavelength, row, col) cube.
    fn band_flux(&self, wavelength: ArrayView1<f64>, cube: ArrayView3<f64>) -> Result<Array2<f64>>;
}

/// Top-hat band: mean flux density between two wavelengths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxcarBand {
    pub lo: f64,
    pub hi: f64,
}

impl BoxcarBand {
    pub fn new(lo: f64, hi: f64) -> Result<Self> {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(IfuSimError::invalid(
                "band",
                format!("need finite lo < hi, got [{lo}, {hi}]"),
            ));
        }
        Ok(Self { lo, hi })
    }

    /// Band roughly matching SDSS r
    pub fn sdss_r() -> Self {
        Self {
            lo: 5500.0,
            hi: 6900.0,
        }
    }
}

impl BandPhotometry for BoxcarBand {
    fn band_flux(&self, wavelength: ArrayView1<f64>, cube: ArrayView3<f64>) -> Result<Array2<f64>> {
        if cube.len_of(Axis(0)) != wavelength.len() {
            return Err(IfuSimError::shape_mismatch(
                "band flux wavelengths",
                &[cube.len_of(Axis(0))],
                &[wavelength.len()],
            ));
        }
        let inside: Vec<usize> = wavelength
            .iter()
            .enumerate()
            .filter(|(_, &l)| l >= self.lo && l <= self.hi)
            .map(|(k, _)| k)
            .collect();
        if inside.is_empty() {
            return Err(IfuSimError::invalid(
                "band",
                format!("no pixels between {} and {} Å", self.lo, self.hi),
            ));
        }

        let mut out = Array2::zeros((cube.len_of(Axis(1)), cube.len_of(Axis(2))));
        Zip::from(&mut out)
            .and(cube.lanes(Axis(0)))
            .par_for_each(|o, lane| {
                let (sum, count) = inside
                    .iter()
                    .map(|&k| lane[k])
                    .filter(|v| v.is_finite())
                    .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                *o = if count > 0 {
                    sum / count as f64
                } else {
                    f64::NAN
                };
            });
        Ok(out)
    }
}

/// Per-spaxel flux ratio between a reference and a mock cube
#[derive(Debug, Clone)]
pub struct FluxScale {
    /// reference / model band flux, (row, col)
    pub ratio: Array2<f64>,
    pub n_replaced_reference: usize,
    pub n_replaced_model: usize,
}

/// Replace non-finite or non-positive band fluxes with the faintest usable one.
///
/// Returns how many values were replaced.
pub fn replace_unusable_band_flux(map: &mut Array2<f64>) -> Result<usize> {
    let faintest = map
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !faintest.is_finite() {
        return Err(IfuSimError::invalid(
            "band flux",
            "map has no finite positive values",
        ));
    }

    let mut n_replaced = 0;
    map.mapv_inplace(|v| {
        if v.is_finite() && v > 0.0 {
            v
        } else {
            n_replaced += 1;
            faintest
        }
    });
    Ok(n_replaced)
}

/// Ratio of reference to model band flux, after replacing unusable values.
pub fn flux_ratio(reference: ArrayView2<f64>, model: ArrayView2<f64>) -> Result<FluxScale> {
    if reference.dim() != model.dim() {
        return Err(IfuSimError::shape_mismatch(
            "flux_ratio model map",
            reference.shape(),
            model.shape(),
        ));
    }
    let mut reference = reference.to_owned();
    let mut model = model.to_owned();
    let n_replaced_reference = replace_unusable_band_flux(&mut reference)?;
    let n_replaced_model = replace_unusable_band_flux(&mut model)?;
    if n_replaced_reference + n_replaced_model > 0 {
        log::warn!(
            "Replaced {n_replaced_reference} reference and {n_replaced_model} model band fluxes \
             with the faintest usable value"
        );
    }

    Ok(FluxScale {
        ratio: reference / model,
        n_replaced_reference,
        n_replaced_model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1, Array3};

    #[test]
    fn test_boxcar_mean() {
        let wave = Array1::linspace(5000.0, 7000.0, 21);
        let cube = Array3::from_shape_fn((21, 1, 2), |(l, _, j)| l as f64 + 10.0 * j as f64);
        let band = BoxcarBand::new(5500.0, 6000.0).unwrap();
        let flux = band.band_flux(wave.view(), cube.view()).unwrap();
        // Pixels 5..=10 are inside
        assert_relative_eq!(flux[[0, 0]], 7.5);
        assert_relative_eq!(flux[[0, 1]], 17.5);
    }

    #[test]
    fn test_boxcar_ignores_non_finite_pixels() {
        let wave = array![1.0, 2.0, 3.0];
        let mut cube = Array3::from_elem((3, 1, 2), 4.0);
        cube[[1, 0, 0]] = f64::NAN;
        cube.slice_mut(ndarray::s![.., 0, 1]).fill(f64::INFINITY);
        let flux = BoxcarBand::new(0.0, 10.0)
            .unwrap()
            .band_flux(wave.view(), cube.view())
            .unwrap();
        assert_eq!(flux[[0, 0]], 4.0);
        assert!(flux[[0, 1]].is_nan());
    }

    #[test]
    fn test_empty_band_is_an_error() {
        let wave = array![1.0, 2.0];
        let cube = Array3::zeros((2, 1, 1));
        assert!(BoxcarBand::new(5.0, 6.0)
            .unwrap()
            .band_flux(wave.view(), cube.view())
            .is_err());
        assert!(BoxcarBand::new(6.0, 5.0).is_err());
    }

    #[test]
    fn test_flux_ratio_replaces_bad_values() {
        let reference = array![[2.0, f64::NAN], [4.0, 8.0]];
        let model = array![[1.0, 1.0], [-1.0, 2.0]];
        let scale = flux_ratio(reference.view(), model.view()).unwrap();
        assert_eq!(scale.n_replaced_reference, 1);
        assert_eq!(scale.n_replaced_model, 1);
        assert_eq!(scale.ratio, array![[2.0, 2.0], [4.0, 4.0]]);
    }

    #[test]
    fn test_flux_ratio_needs_some_signal() {
        let reference = array![[0.0, f64::NAN]];
        let model = array![[1.0, 1.0]];
        assert!(flux_ratio(reference.view(), model.view()).is_err());
    }
}
