//! Dust attenuation curves.
//!
//! An [`ExtinctionLaw`] turns a colour excess `E(B-V)` into a multiplicative
//! transmission curve. The library only needs the curve; how it is computed
//! is up to the implementation. [`TabulatedExtinction`] interpolates a table
//! of `A_λ / A_V`:
//!
//! ```text
//! A_λ = (A_λ / A_V) · R_V · E(B-V)
//! transmission = 10^(-0.4 · A_λ)
//! ```

use ndarray::{Array1, Array3, ArrayView1, ArrayView3, Axis, Zip};
use shared::algo::interp_extrapolate;

use crate::error::{IfuSimError, Result};

/// Multiplicative attenuation as a function of wavelength
pub trait ExtinctionLaw: Send + Sync {
    /// Transmission (between 0 and 1 for positive `ebv`) at each wavelength (Å).
    fn attenuation(&self, wavelength: ArrayView1<f64>, ebv: f64) -> Result<Array1<f64>>;

    /// Transmission for a cube of per-spaxel wavelengths, (wavelength, row, col).
    fn attenuation_cube(&self, wavelength: ArrayView3<f64>, ebv: f64) -> Result<Array3<f64>> {
        let mut out = Array3::zeros(wavelength.raw_dim());
        for (mut out_lane, lane) in out
            .lanes_mut(Axis(0))
            .into_iter()
            .zip(wavelength.lanes(Axis(0)))
        {
            out_lane.assign(&self.attenuation(lane, ebv)?);
        }
        Ok(out)
    }
}

/// Extinction law interpolated from an `A_λ / A_V` table
#[derive(Debug, Clone)]
pub struct TabulatedExtinction {
    wavelength: Vec<f64>,
    a_lambda_over_a_v: Vec<f64>,
    r_v: f64,
}

impl TabulatedExtinction {
    /// # Arguments
    /// * `wavelength` - Table wavelengths (Å), ascending
    /// * `a_lambda_over_a_v` - Extinction relative to the V band
    /// * `r_v` - Total-to-selective extinction ratio `A_V / E(B-V)`
    pub fn new(wavelength: Vec<f64>, a_lambda_over_a_v: Vec<f64>, r_v: f64) -> Result<Self> {
        if !(r_v.is_finite() && r_v > 0.0) {
            return Err(IfuSimError::invalid("r_v", format!("must be positive, got {r_v}")));
        }
        // Validates the table once so evaluation cannot fail later
        interp_extrapolate(5500.0, &wavelength, &a_lambda_over_a_v)?;
        Ok(Self {
            wavelength,
            a_lambda_over_a_v,
            r_v,
        })
    }

    /// Coarse tabulation of the average diffuse Milky-Way curve with `R_V = 3.1`
    pub fn diffuse_milky_way() -> Self {
        Self {
            wavelength: vec![
                3000.0, 3650.0, 4400.0, 5500.0, 6500.0, 8000.0, 9000.0, 10000.0, 12500.0,
                16500.0, 22000.0,
            ],
            a_lambda_over_a_v: vec![
                1.80, 1.57, 1.32, 1.00, 0.80, 0.60, 0.49, 0.42, 0.28, 0.18, 0.12,
            ],
            r_v: 3.1,
        }
    }

    pub fn r_v(&self) -> f64 {
        self.r_v
    }

    /// `A_λ / A_V` at one wavelength, extrapolated linearly outside the table
    pub fn relative_extinction(&self, wavelength: f64) -> Result<f64> {
        Ok(interp_extrapolate(
            wavelength,
            &self.wavelength,
            &self.a_lambda_over_a_v,
        )?)
    }
}

impl ExtinctionLaw for TabulatedExtinction {
    fn attenuation(&self, wavelength: ArrayView1<f64>, ebv: f64) -> Result<Array1<f64>> {
        if !ebv.is_finite() {
            return Err(IfuSimError::invalid("ebv", "must be finite"));
        }
        let a_v = self.r_v * ebv;
        let mut out = Array1::zeros(wavelength.len());
        for (o, &l) in out.iter_mut().zip(wavelength.iter()) {
            let a_lambda = self.relative_extinction(l)? * a_v;
            *o = 10f64.powf(-0.4 * a_lambda);
        }
        Ok(out)
    }

    fn attenuation_cube(&self, wavelength: ArrayView3<f64>, ebv: f64) -> Result<Array3<f64>> {
        if !ebv.is_finite() {
            return Err(IfuSimError::invalid("ebv", "must be finite"));
        }
        let a_v = self.r_v * ebv;
        let mut out = Array3::zeros(wavelength.raw_dim());
        Zip::from(&mut out).and(&wavelength).par_for_each(|o, &l| {
            // Table validated at construction
            let ratio = interp_extrapolate(l, &self.wavelength, &self.a_lambda_over_a_v)
                .unwrap_or(f64::NAN);
            *o = 10f64.powf(-0.4 * ratio * a_v);
        });
        Ok(out)
    }
}
