//! Observed reference exposures and where they come from

use ndarray::{Array1, Array2, Array3, Axis};
use std::collections::HashMap;

use crate::error::{IfuSimError, Result};

/// An observed cube whose noise, geometry and calibration a mock inherits
#[derive(Debug, Clone)]
pub struct ReferenceCube {
    /// Observed flux, (wavelength, row, col)
    pub flux: Array3<f64>,
    pub ivar: Array3<f64>,
    /// Observed wavelengths (Å), log-uniform
    pub wavelength: Array1<f64>,
    /// Measured spectral resolution `R = λ/Δλ` at each wavelength
    pub spectral_resolution: Array1<f64>,
    pub spectral_resolution_uncertainty: Array1<f64>,
    /// Galactic colour excess `E(B-V)` along the line of sight
    pub ebv_galactic: f64,
    /// Broad-band image; zero marks spaxels outside the footprint
    pub r_image: Array2<f64>,
}

impl ReferenceCube {
    /// Spatial (rows, cols) shape
    pub fn map_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.flux.dim();
        (rows, cols)
    }

    pub fn n_wavelengths(&self) -> usize {
        self.wavelength.len()
    }

    /// Check the per-column arrays against the cube.
    pub fn validate(&self) -> Result<()> {
        let nl = self.wavelength.len();
        let (rows, cols) = self.map_shape();
        if self.flux.len_of(Axis(0)) != nl {
            return Err(IfuSimError::shape_mismatch(
                "reference flux",
                &[nl, rows, cols],
                self.flux.shape(),
            ));
        }
        if self.ivar.dim() != self.flux.dim() {
            return Err(IfuSimError::shape_mismatch(
                "reference ivar",
                self.flux.shape(),
                self.ivar.shape(),
            ));
        }
        if self.spectral_resolution.len() != nl || self.spectral_resolution_uncertainty.len() != nl
        {
            return Err(IfuSimError::shape_mismatch(
                "reference resolution columns",
                &[nl, nl],
                &[
                    self.spectral_resolution.len(),
                    self.spectral_resolution_uncertainty.len(),
                ],
            ));
        }
        if self.r_image.dim() != (rows, cols) {
            return Err(IfuSimError::shape_mismatch(
                "reference r-band image",
                &[rows, cols],
                self.r_image.shape(),
            ));
        }
        if !self.ebv_galactic.is_finite() {
            return Err(IfuSimError::invalid("ebv_galactic", "must be finite"));
        }
        Ok(())
    }
}

/// Line-of-sight velocity map of the object a mock stands in for
#[derive(Debug, Clone)]
pub struct VelocityMap {
    /// Velocity relative to the systemic redshift (km/s), (row, col)
    pub velocity_kms: Array2<f64>,
    /// Spaxels with a trustworthy measurement
    pub valid: Array2<bool>,
}

impl VelocityMap {
    /// Everything at rest and valid
    pub fn at_rest(map_shape: (usize, usize)) -> Self {
        Self {
            velocity_kms: Array2::zeros(map_shape),
            valid: Array2::from_elem(map_shape, true),
        }
    }

    pub fn map_shape(&self) -> (usize, usize) {
        self.velocity_kms.dim()
    }

    /// Invalid or non-finite velocities are treated as zero.
    pub fn usable_velocity(&self) -> Array2<f64> {
        let mut v = self.velocity_kms.clone();
        ndarray::Zip::from(&mut v)
            .and(&self.valid)
            .for_each(|v, &ok| {
                if !(ok && v.is_finite()) {
                    *v = 0.0;
                }
            });
        v
    }

    /// Spaxels whose velocity is flagged valid and finite
    pub fn usable_mask(&self) -> Array2<bool> {
        ndarray::Zip::from(&self.valid)
            .and(&self.velocity_kms)
            .map_collect(|&ok, v| ok && v.is_finite())
    }
}

/// Provider of reference exposures, keyed by an identifier
pub trait ReferenceSource: Send + Sync {
    fn load_reference_cube(&self, id: &str) -> Result<ReferenceCube>;

    fn load_velocity_map(&self, id: &str) -> Result<VelocityMap>;
}

/// Reference source backed by maps held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryReferenceSource {
    cubes: HashMap<String, ReferenceCube>,
    velocities: HashMap<String, VelocityMap>,
}

impl InMemoryReferenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, cube: ReferenceCube, velocity: VelocityMap) {
        let id = id.into();
        self.cubes.insert(id.clone(), cube);
        self.velocities.insert(id, velocity);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.cubes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }
}

fn missing(what: &str, id: &str) -> IfuSimError {
    IfuSimError::Collaborator(format!("no {what} for '{id}'").into())
}

impl ReferenceSource for InMemoryReferenceSource {
    fn load_reference_cube(&self, id: &str) -> Result<ReferenceCube> {
        self.cubes
            .get(id)
            .cloned()
            .ok_or_else(|| missing("reference cube", id))
    }

    fn load_velocity_map(&self, id: &str) -> Result<VelocityMap> {
        self.velocities
            .get(id)
            .cloned()
            .ok_or_else(|| missing("velocity map", id))
    }
}
