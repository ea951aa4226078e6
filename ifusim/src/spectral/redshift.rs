//! Conserved-flux change of frame between two redshifts.
//!
//! Moving a spectrum by `z` stretches its wavelengths by `(1 + z)` and dilutes
//! its flux density by the same factor, so the integrated flux over any band
//! is unchanged. Inverse variance scales as the square of the flux factor.

use ndarray::{Array1, Array3, ArrayView1, ArrayView2, Axis, Zip};

use crate::error::{IfuSimError, Result};
use crate::spectral::field::SpectrumOrField;

/// Speed of light in km/s
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// A redshift, always finite and greater than -1
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Redshift(f64);

impl Redshift {
    pub const ZERO: Redshift = Redshift(0.0);

    pub fn new(z: f64) -> Result<Self> {
        if z.is_finite() && z > -1.0 {
            Ok(Self(z))
        } else {
            Err(IfuSimError::InvalidRedshift(z))
        }
    }

    /// Non-relativistic Doppler shift `v / c` for a velocity in km/s
    pub fn from_velocity(v_kms: f64) -> Result<Self> {
        Self::new(v_kms / SPEED_OF_LIGHT_KMS)
    }

    /// Shift that takes a spectrum observed at `z_in` to `z_out`
    pub fn between(z_in: Redshift, z_out: Redshift) -> Result<Self> {
        Self::new(z_out.one_plus() / z_in.one_plus() - 1.0)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Stretch factor `1 + z`
    pub fn one_plus(self) -> f64 {
        1.0 + self.0
    }

    /// Combined shift `(1 + z_a)(1 + z_b) - 1`
    pub fn compose(self, other: Redshift) -> Result<Self> {
        Self::new(self.one_plus() * other.one_plus() - 1.0)
    }

    /// Product rule over any number of shifts; an empty list is `z = 0`.
    pub fn compose_all(shifts: &[Redshift]) -> Result<Self> {
        shifts
            .iter()
            .try_fold(Redshift::ZERO, |acc, z| acc.compose(*z))
    }

    /// Shift that undoes this one
    pub fn inverse(self) -> Result<Self> {
        Self::new(1.0 / self.one_plus() - 1.0)
    }
}

/// A spectrum moved into a new frame
#[derive(Debug, Clone)]
pub struct RedshiftedSpectrum {
    pub wavelength: Array1<f64>,
    pub flux: Array1<f64>,
    pub ivar: Array1<f64>,
}

/// Cubes moved into per-spaxel frames, all indexed (wavelength, row, col)
#[derive(Debug, Clone)]
pub struct RedshiftedCube {
    pub wavelength: Array3<f64>,
    pub flux: Array3<f64>,
    pub ivar: Array3<f64>,
}

fn check_ivar<'a>(ivar: impl IntoIterator<Item = &'a f64>) -> Result<()> {
    match ivar.into_iter().enumerate().find(|(_, &v)| v < 0.0) {
        Some((index, &value)) => Err(IfuSimError::NegativeInverseVariance { value, index }),
        None => Ok(()),
    }
}

/// Redshift one spectrum: wavelength · (1+z), flux / (1+z), ivar · (1+z)².
///
/// NaN inverse variance is passed through (it already means "no information");
/// negative values are rejected.
pub fn redshift_spectrum(
    wavelength: ArrayView1<f64>,
    flux: ArrayView1<f64>,
    ivar: ArrayView1<f64>,
    z: Redshift,
) -> Result<RedshiftedSpectrum> {
    let n = wavelength.len();
    if flux.len() != n || ivar.len() != n {
        return Err(IfuSimError::shape_mismatch(
            "redshift_spectrum",
            &[n, n],
            &[flux.len(), ivar.len()],
        ));
    }
    check_ivar(ivar.iter())?;

    let a = z.one_plus();
    Ok(RedshiftedSpectrum {
        wavelength: wavelength.mapv(|w| w * a),
        flux: flux.mapv(|f| f / a),
        ivar: ivar.mapv(|v| v * a * a),
    })
}

/// Redshift a spectrum (or a cube of spectra) by a per-spaxel redshift map.
///
/// `wavelength` is the common rest-frame grid. A uniform `flux`/`ivar` is
/// broadcast across the map; the output wavelength grid differs per spaxel.
pub fn redshift_cube(
    wavelength: ArrayView1<f64>,
    flux: &SpectrumOrField,
    ivar: &SpectrumOrField,
    z_map: ArrayView2<f64>,
) -> Result<RedshiftedCube> {
    let nl = wavelength.len();
    let map_shape = z_map.dim();
    flux.check_compatible("redshift flux", nl, map_shape)?;
    ivar.check_compatible("redshift ivar", nl, map_shape)?;
    if let Some(&bad) = z_map.iter().find(|&&z| !(z.is_finite() && z > -1.0)) {
        return Err(IfuSimError::InvalidRedshift(bad));
    }
    match ivar {
        SpectrumOrField::Uniform(v) => check_ivar(v.iter())?,
        SpectrumOrField::Field(v) => check_ivar(v.iter())?,
    }

    let (rows, cols) = map_shape;
    let wave = Array3::from_shape_fn((nl, rows, cols), |(l, i, j)| {
        wavelength[l] * (1.0 + z_map[[i, j]])
    });

    let mut flux = flux.broadcast(map_shape)?;
    let mut ivar = ivar.broadcast(map_shape)?;
    Zip::from(flux.lanes_mut(Axis(0)))
        .and(ivar.lanes_mut(Axis(0)))
        .and(&z_map)
        .par_for_each(|mut f, mut v, &z| {
            let a = 1.0 + z;
            f.mapv_inplace(|x| x / a);
            v.mapv_inplace(|x| x * a * a);
        });

    Ok(RedshiftedCube {
        wavelength: wave,
        flux,
        ivar,
    })
}
