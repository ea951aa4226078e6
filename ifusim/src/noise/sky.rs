//! Sky-background contamination drawn from a library of sky spectra

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use rand::Rng;

use crate::error::{IfuSimError, Result};

/// Relative tolerance when checking that a cube shares the library's grid
const GRID_TOLERANCE: f64 = 1.0e-6;

/// Sky flux and inverse variance for every spaxel of a cube
#[derive(Debug, Clone)]
pub struct SkyCube {
    /// (wavelength, row, col)
    pub flux: Array3<f64>,
    pub ivar: Array3<f64>,
}

/// Sky spectra sampled on one common wavelength grid
#[derive(Debug, Clone)]
pub struct SkyLibrary {
    wavelength: Array1<f64>,
    /// (spectrum, wavelength)
    flux: Array2<f64>,
    ivar: Array2<f64>,
}

impl SkyLibrary {
    /// # Arguments
    /// * `wavelength` - Common grid (Å)
    /// * `flux`, `ivar` - One sky spectrum per row
    pub fn new(wavelength: Array1<f64>, flux: Array2<f64>, ivar: Array2<f64>) -> Result<Self> {
        if flux.nrows() == 0 {
            return Err(IfuSimError::EmptyInput("sky library"));
        }
        if flux.ncols() != wavelength.len() {
            return Err(IfuSimError::shape_mismatch(
                "sky library flux",
                &[flux.nrows(), wavelength.len()],
                flux.shape(),
            ));
        }
        if ivar.dim() != flux.dim() {
            return Err(IfuSimError::shape_mismatch(
                "sky library ivar",
                flux.shape(),
                ivar.shape(),
            ));
        }
        Ok(Self {
            wavelength,
            flux,
            ivar,
        })
    }

    /// Number of sky spectra
    pub fn len(&self) -> usize {
        self.flux.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.nrows() == 0
    }

    pub fn wavelength(&self) -> ArrayView1<'_, f64> {
        self.wavelength.view()
    }

    /// Fail unless `wavelength` is the library's grid.
    pub fn ensure_grid(&self, wavelength: ArrayView1<f64>) -> Result<()> {
        if wavelength.len() != self.wavelength.len() {
            return Err(IfuSimError::shape_mismatch(
                "sky wavelength grid",
                &[self.wavelength.len()],
                &[wavelength.len()],
            ));
        }
        let mismatch = wavelength
            .iter()
            .zip(self.wavelength.iter())
            .any(|(a, b)| (a - b).abs() > GRID_TOLERANCE * b.abs());
        if mismatch {
            return Err(IfuSimError::invalid(
                "sky library",
                "wavelength grid differs from the cube's",
            ));
        }
        Ok(())
    }

    /// Draw one library spectrum, uniformly at random, for every spaxel.
    pub fn sky_cube<R: Rng + ?Sized>(&self, map_shape: (usize, usize), rng: &mut R) -> SkyCube {
        let (rows, cols) = map_shape;
        let nl = self.wavelength.len();
        let mut flux = Array3::zeros((nl, rows, cols));
        let mut ivar = Array3::zeros((nl, rows, cols));

        for i in 0..rows {
            for j in 0..cols {
                let pick = rng.gen_range(0..self.len());
                flux.slice_mut(ndarray::s![.., i, j])
                    .assign(&self.flux.index_axis(Axis(0), pick));
                ivar.slice_mut(ndarray::s![.., i, j])
                    .assign(&self.ivar.index_axis(Axis(0), pick));
            }
        }
        SkyCube { flux, ivar }
    }
}
