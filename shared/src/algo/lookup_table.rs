//! Regularly sampled lookup table with quadratic interpolation.
//!
//! Used to replace an expensive smooth function (for example a regression
//! model evaluated at every pixel of a cube) by a few thousand precomputed
//! samples. Between samples the value comes from the Lagrange parabola
//! through the three nearest table entries, which is exact for polynomials up
//! to second order.

use thiserror::Error;

/// Errors from building or querying a [`LookupTable`]
#[derive(Debug, Error, PartialEq)]
pub enum LookupError {
    #[error("Value {value} is outside domain bounds ({min}, {max})")]
    OutOfBounds { value: f64, min: f64, max: f64 },
    #[error("Invalid table domain [{0}, {1}]: bounds must be finite with min < max")]
    InvalidDomain(f64, f64),
    #[error("Quadratic interpolation needs at least 3 samples, got {0}")]
    TooFewPoints(usize),
}

/// Function values sampled on `n` evenly spaced points of `[x_min, x_max]`
#[derive(Debug, Clone)]
pub struct LookupTable {
    x_min: f64,
    x_max: f64,
    dx: f64,
    values: Vec<f64>,
}

impl LookupTable {
    /// Tabulate `f` on `n_points` evenly spaced samples of `[x_min, x_max]`.
    pub fn new<F>(x_min: f64, x_max: f64, n_points: usize, f: F) -> Result<Self, LookupError>
    where
        F: Fn(f64) -> f64,
    {
        if !(x_min.is_finite() && x_max.is_finite() && x_min < x_max) {
            return Err(LookupError::InvalidDomain(x_min, x_max));
        }
        if n_points < 3 {
            return Err(LookupError::TooFewPoints(n_points));
        }

        let dx = (x_max - x_min) / (n_points - 1) as f64;
        let values = (0..n_points).map(|i| f(x_min + i as f64 * dx)).collect();

        Ok(Self {
            x_min,
            x_max,
            dx,
            values,
        })
    }

    /// Interpolated value at `x`; fails outside the table domain.
    pub fn eval(&self, x: f64) -> Result<f64, LookupError> {
        if !self.contains(x) {
            return Err(LookupError::OutOfBounds {
                value: x,
                min: self.x_min,
                max: self.x_max,
            });
        }
        Ok(self.interpolate(x))
    }

    /// Interpolated value at `x` after clamping it into the table domain.
    pub fn eval_clamped(&self, x: f64) -> f64 {
        self.interpolate(x.clamp(self.x_min, self.x_max))
    }

    fn interpolate(&self, x: f64) -> f64 {
        let n = self.values.len();
        let t = ((x - self.x_min) / self.dx).floor();
        // Leftmost sample of the three-point stencil
        let i = if t <= 0.0 {
            0
        } else {
            (t as usize).min(n - 3)
        };

        let x0 = self.x_min + i as f64 * self.dx;
        let u = (x - x0) / self.dx;
        let (y0, y1, y2) = (self.values[i], self.values[i + 1], self.values[i + 2]);

        // Lagrange basis on the unit-spaced nodes 0, 1, 2
        let l0 = 0.5 * (u - 1.0) * (u - 2.0);
        let l1 = -u * (u - 2.0);
        let l2 = 0.5 * u * (u - 1.0);
        y0 * l0 + y1 * l1 + y2 * l2
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.x_min, self.x_max)
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn step_size(&self) -> f64 {
        self.dx
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.x_min && x <= self.x_max
    }
}
