//! Uniform spectra versus spatially varying fields.
//!
//! A model spectrum, an inverse-variance vector or a set of LSF widths may
//! either be the same for every spaxel or vary across the map. Consumers
//! take a [`SpectrumOrField`] and state which they need; turning a uniform
//! spectrum into a cube happens in exactly one place, [`SpectrumOrField::broadcast`].

use ndarray::{s, Array1, Array3, ArrayView1, ArrayView3, Axis};

use crate::error::{IfuSimError, Result};

/// A spectral quantity that is either shared by all spaxels or given per spaxel.
///
/// Fields are indexed (wavelength, row, col), matching the cube layout.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrumOrField {
    Uniform(Array1<f64>),
    Field(Array3<f64>),
}

impl SpectrumOrField {
    /// Number of samples along the wavelength axis
    pub fn spectral_len(&self) -> usize {
        match self {
            SpectrumOrField::Uniform(spec) => spec.len(),
            SpectrumOrField::Field(cube) => cube.len_of(Axis(0)),
        }
    }

    /// Spatial shape, if the quantity varies across the map
    pub fn map_shape(&self) -> Option<(usize, usize)> {
        match self {
            SpectrumOrField::Uniform(_) => None,
            SpectrumOrField::Field(cube) => {
                let (_, rows, cols) = cube.dim();
                Some((rows, cols))
            }
        }
    }

    /// Check that this quantity can be used with a cube of the given geometry.
    pub fn check_compatible(
        &self,
        context: &'static str,
        spectral_len: usize,
        map_shape: (usize, usize),
    ) -> Result<()> {
        let compatible = match self {
            SpectrumOrField::Uniform(spec) => spec.len() == spectral_len,
            SpectrumOrField::Field(cube) => cube.dim() == (spectral_len, map_shape.0, map_shape.1),
        };
        if compatible {
            Ok(())
        } else {
            let actual = match self {
                SpectrumOrField::Uniform(spec) => vec![spec.len()],
                SpectrumOrField::Field(cube) => cube.shape().to_vec(),
            };
            Err(IfuSimError::shape_mismatch(
                context,
                &[spectral_len, map_shape.0, map_shape.1],
                &actual,
            ))
        }
    }

    /// Spectrum at one spaxel
    pub fn lane(&self, row: usize, col: usize) -> ArrayView1<'_, f64> {
        match self {
            SpectrumOrField::Uniform(spec) => spec.view(),
            SpectrumOrField::Field(cube) => cube.slice(s![.., row, col]),
        }
    }

    /// Materialise as a (wavelength, row, col) cube.
    ///
    /// A uniform spectrum is repeated at every spaxel; a field must already
    /// have the requested map shape.
    pub fn broadcast(&self, map_shape: (usize, usize)) -> Result<Array3<f64>> {
        match self {
            SpectrumOrField::Uniform(spec) => {
                let (rows, cols) = map_shape;
                Ok(Array3::from_shape_fn((spec.len(), rows, cols), |(l, _, _)| spec[l]))
            }
            SpectrumOrField::Field(cube) => {
                self.check_compatible("broadcast", cube.len_of(Axis(0)), map_shape)?;
                Ok(cube.clone())
            }
        }
    }

    /// Apply a function to every sample
    pub fn mapv(&self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            SpectrumOrField::Uniform(spec) => SpectrumOrField::Uniform(spec.mapv(f)),
            SpectrumOrField::Field(cube) => SpectrumOrField::Field(cube.mapv(f)),
        }
    }
}

impl From<Array1<f64>> for SpectrumOrField {
    fn from(spec: Array1<f64>) -> Self {
        SpectrumOrField::Uniform(spec)
    }
}

impl From<Array3<f64>> for SpectrumOrField {
    fn from(cube: Array3<f64>) -> Self {
        SpectrumOrField::Field(cube)
    }
}

/// Spatial (rows, cols) shape of a (wavelength, row, col) cube
pub fn map_shape(cube: &ArrayView3<f64>) -> (usize, usize) {
    let (_, rows, cols) = cube.dim();
    (rows, cols)
}

/// Fail unless two cubes have identical shapes
pub fn ensure_same_shape(
    context: &'static str,
    expected: &ArrayView3<f64>,
    actual: &ArrayView3<f64>,
) -> Result<()> {
    if expected.dim() == actual.dim() {
        Ok(())
    } else {
        Err(IfuSimError::shape_mismatch(
            context,
            expected.shape(),
            actual.shape(),
        ))
    }
}

/// Sum flux and inverse variance over all spaxels.
pub fn coadd(flux: ArrayView3<f64>, ivar: ArrayView3<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
    ensure_same_shape("coadd", &flux, &ivar)?;
    let sum_spatial = |cube: ArrayView3<f64>| cube.sum_axis(Axis(2)).sum_axis(Axis(1));
    Ok((sum_spatial(flux), sum_spatial(ivar)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_uniform_broadcast_repeats_spectrum() {
        let spec = SpectrumOrField::from(array![1.0, 2.0, 3.0]);
        let cube = spec.broadcast((2, 4)).unwrap();
        assert_eq!(cube.dim(), (3, 2, 4));
        assert_eq!(cube[[2, 1, 3]], 3.0);
        assert_eq!(spec.lane(1, 1), array![1.0, 2.0, 3.0]);
        assert_eq!(spec.map_shape(), None);
    }

    #[test]
    fn test_field_broadcast_checks_shape() {
        let field = SpectrumOrField::from(Array3::<f64>::zeros((3, 2, 2)));
        assert!(field.broadcast((2, 2)).is_ok());
        assert!(field.broadcast((2, 3)).is_err());
        assert!(field.check_compatible("test", 4, (2, 2)).is_err());
        assert_eq!(field.map_shape(), Some((2, 2)));
    }

    #[test]
    fn test_coadd_sums_spatially() {
        let flux = Array3::from_elem((2, 3, 3), 1.0);
        let ivar = Array3::from_elem((2, 3, 3), 0.5);
        let (f, iv) = coadd(flux.view(), ivar.view()).unwrap();
        assert_eq!(f, array![9.0, 9.0]);
        assert_eq!(iv, array![4.5, 4.5]);
    }
}
