//! Error taxonomy for mock-cube synthesis.
//!
//! Every failure maps to one of three kinds:
//!
//! - **Configuration**: static inputs are malformed (shape mismatches, empty
//!   calibration sets, unsupported strategies). Always fatal.
//! - **Domain**: a physically invalid value (redshift ≤ -1, negative
//!   inverse variance, non-positive kernel width). Fatal for the object being
//!   built; the orchestration layer may skip it and continue the batch.
//! - **Collaborator**: an external provider (reference-cube loader,
//!   extinction law, photometry) failed.
//!
//! Per-spaxel degeneracies (low SNR, clipped widths, out-of-range pixels) are
//! never errors: they are flagged in the returned data and logged.

use thiserror::Error;

/// Broad classification of an [`IfuSimError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Domain,
    Collaborator,
}

/// Errors produced by the mock-cube library
#[derive(Debug, Error)]
pub enum IfuSimError {
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    #[error("No usable calibration points for LSF fit ({0} rows supplied, all rejected)")]
    EmptyCalibration(usize),

    #[error("Regridding strategy '{0}' is reserved but not implemented")]
    UnsupportedStrategy(String),

    #[error("Unknown regridding strategy name '{0}'")]
    UnknownStrategy(String),

    #[error("Wavelength grid is not uniformly log-spaced: {0}")]
    IrregularGrid(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Redshift must be finite and greater than -1, got {0}")]
    InvalidRedshift(f64),

    #[error("Inverse variance must be non-negative, got {value} at index {index}")]
    NegativeInverseVariance { value: f64, index: usize },

    #[error("Kernel width must be finite and positive, got {value} at index {index}")]
    NonPositiveWidth { value: f64, index: usize },

    #[error("Covariance matrix is not positive semi-definite (smallest eigenvalue {0:e})")]
    NotPositiveSemiDefinite(f64),

    #[error("Covariance matrix is not symmetric (max asymmetry {0:e})")]
    NotSymmetric(f64),

    #[error("Linear algebra failure: {0}")]
    Numerical(String),

    #[error("Statistics failure: {0}")]
    Stats(#[from] shared::algo::StatsError),

    #[error("Interpolation failure: {0}")]
    Interp(#[from] shared::algo::InterpError),

    #[error("Lookup table failure: {0}")]
    Lookup(#[from] shared::algo::LookupError),

    #[error("Collaborator failure: {0}")]
    Collaborator(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Failed to read configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IfuSimError {
    /// Classify the error according to the library's error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            IfuSimError::ShapeMismatch { .. }
            | IfuSimError::EmptyInput(_)
            | IfuSimError::EmptyCalibration(_)
            | IfuSimError::UnsupportedStrategy(_)
            | IfuSimError::UnknownStrategy(_)
            | IfuSimError::IrregularGrid(_)
            | IfuSimError::InvalidParameter { .. }
            | IfuSimError::NotSymmetric(_)
            | IfuSimError::Interp(_)
            | IfuSimError::Stats(_)
            | IfuSimError::Lookup(_)
            | IfuSimError::Config(_)
            | IfuSimError::Io(_) => ErrorKind::Configuration,
            IfuSimError::InvalidRedshift(_)
            | IfuSimError::NegativeInverseVariance { .. }
            | IfuSimError::NonPositiveWidth { .. }
            | IfuSimError::NotPositiveSemiDefinite(_)
            | IfuSimError::Numerical(_) => ErrorKind::Domain,
            IfuSimError::Collaborator(_) => ErrorKind::Collaborator,
        }
    }

    pub(crate) fn shape_mismatch(
        context: &'static str,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        IfuSimError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        IfuSimError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, IfuSimError>;
