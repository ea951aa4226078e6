//! Numerical building blocks specific to mock-cube synthesis

pub mod gaussian_process;

pub use gaussian_process::{log_spaced, rbf_kernel, GaussianProcess};
