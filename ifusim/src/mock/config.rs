//! Mock-cube pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{IfuSimError, Result};
use crate::noise::snr::DEFAULT_SNR_WINDOW;
use crate::spectral::convolve::{EdgeMode, DEFAULT_WIDTH_FLOOR};
use crate::spectral::lsf::LsfFitConfig;
use crate::spectral::regrid::RegridStrategy;

/// Window of the running median that replaces non-finite output flux
pub const DEFAULT_MEDIAN_FILL_WINDOW: usize = 11;

/// Settings for [`crate::mock::MockCubeBuilder`]
///
/// Every field has a default, so a JSON file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Cosmological redshift of the object the mock stands in for
    pub z_cosmo: f64,
    pub regrid_strategy: RegridStrategy,
    /// What the unconvolvable edge pixels hold after LSF blurring
    pub edge_mode: EdgeMode,
    /// Smallest LSF width (pixels) passed to the convolver
    pub width_floor: f64,
    /// Running-median window for the SNR cube (odd)
    pub snr_window: usize,
    /// Line-of-sight velocity dispersion applied to the rest-frame model
    pub velocity_dispersion_kms: Option<f64>,
    /// Add a correlated noise field when a covariance is supplied
    pub add_covariance_noise: bool,
    /// Add SNR-scaled random noise
    pub add_snr_noise: bool,
    /// Add sky spectra when a sky library is supplied
    pub add_sky: bool,
    /// Running-median window used to fill non-finite output flux (odd)
    pub median_fill_window: usize,
    /// Base seed for every random draw
    pub seed: u64,
    pub lsf: LsfFitConfig,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            z_cosmo: 0.0,
            regrid_strategy: RegridStrategy::default(),
            edge_mode: EdgeMode::default(),
            width_floor: DEFAULT_WIDTH_FLOOR,
            snr_window: DEFAULT_SNR_WINDOW,
            velocity_dispersion_kms: None,
            add_covariance_noise: true,
            add_snr_noise: true,
            add_sky: false,
            median_fill_window: DEFAULT_MEDIAN_FILL_WINDOW,
            seed: 0,
            lsf: LsfFitConfig::default(),
        }
    }
}

impl MockConfig {
    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if !(self.z_cosmo.is_finite() && self.z_cosmo > -1.0) {
            return Err(IfuSimError::InvalidRedshift(self.z_cosmo));
        }
        if !self.regrid_strategy.is_implemented() {
            return Err(IfuSimError::UnsupportedStrategy(
                self.regrid_strategy.name().to_string(),
            ));
        }
        if !(self.width_floor.is_finite() && self.width_floor > 0.0) {
            return Err(IfuSimError::invalid(
                "width_floor",
                format!("must be positive, got {}", self.width_floor),
            ));
        }
        for (name, window) in [
            ("snr_window", self.snr_window),
            ("median_fill_window", self.median_fill_window),
        ] {
            if window == 0 || window % 2 == 0 {
                return Err(IfuSimError::invalid(
                    name,
                    format!("must be odd, got {window}"),
                ));
            }
        }
        if let Some(sigma) = self.velocity_dispersion_kms {
            if !(sigma.is_finite() && sigma >= 0.0) {
                return Err(IfuSimError::invalid(
                    "velocity_dispersion_kms",
                    format!("must be non-negative, got {sigma}"),
                ));
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
