//! Spectral-axis operations on spectra and cubes
//!
//! Grids, frame changes, instrumental blurring and regridding. Everything
//! here works on plain arrays and takes its parameters explicitly; the
//! orchestration that chains these steps lives in [`crate::mock`].

pub mod convolve;
pub mod field;
pub mod grid;
pub mod lsf;
pub mod redshift;
pub mod regrid;

pub use convolve::{
    broaden_by_velocity_dispersion, clip_widths, convolve_cube, gaussian_filter,
    kernel_half_width, velocity_dispersion_widths, ClippedWidths, EdgeMode, DEFAULT_WIDTH_FLOOR,
};
pub use field::{coadd, SpectrumOrField};
pub use grid::{determine_dlogl, LogWavelengthGrid};
pub use lsf::{LineSpreadFunction, LsfFitConfig};
pub use redshift::{redshift_cube, redshift_spectrum, Redshift, SPEED_OF_LIGHT_KMS};
pub use regrid::{RegridResult, RegridSpectrum, RegridStrategy, Regridder};
