//! Mock integral-field spectroscopy datacubes
//!
//! This crate turns noiseless model spectra into realistic mock IFU
//! observations by borrowing the geometry, wavelength grid, spectral
//! resolution and noise of a real reference exposure. The core is the
//! spectral resampling engine in [`spectral`]: redshifting, variable-width
//! Gaussian blurring and regridding onto a log-wavelength grid, all
//! vectorised over spaxels.

pub mod algo;
pub mod error;
pub mod mock;
pub mod noise;
pub mod photometry;
pub mod spectral;

// Re-exports for easier access
pub use error::{ErrorKind, IfuSimError, Result};
pub use mock::{MockConfig, MockCube, MockCubeBuilder, ModelSpectrum, ReferenceCube, VelocityMap};
pub use noise::covariance::CovarianceSynthesizer;
pub use spectral::field::SpectrumOrField;
pub use spectral::grid::LogWavelengthGrid;
pub use spectral::lsf::{LineSpreadFunction, LsfFitConfig};
pub use spectral::redshift::Redshift;
pub use spectral::regrid::{RegridStrategy, Regridder};
