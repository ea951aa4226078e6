//! Noise models for mock cubes
//!
//! - [`covariance`]: reduced-basis spectral covariance and correlated noise fields
//! - [`snr`]: SNR characterisation of observations and SNR-scaled random noise
//! - [`sky`]: sky-background spectra drawn from a library

pub mod covariance;
pub mod sky;
pub mod snr;

pub use covariance::{
    covariance_factor, noise_field, CovarianceMap, CovarianceSynthesizer, SpaxelCovariance,
    LOW_SNR_THRESHOLD, LOW_SNR_VARIANCE,
};
pub use sky::{SkyCube, SkyLibrary};
pub use snr::{
    median_filter_cube, snr_cube, snr_scaled_noise, SnrCharacterisation, DEFAULT_SNR_WINDOW,
};
