//! Seeded synthetic inputs for the mock pipeline.
//!
//! Produces a plausible reference exposure (exponential disc with a stellar
//! continuum, Gaussian noise and a smooth resolution curve), a rotating-disc
//! velocity map, a rest-frame model spectrum that covers the reference grid
//! with some margin, and a small sky library. Everything is reproducible from
//! a `u64` seed.

use ndarray::{Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

use crate::error::{IfuSimError, Result};
use crate::mock::builder::ModelSpectrum;
use crate::mock::reference::{ReferenceCube, VelocityMap};
use crate::noise::sky::SkyLibrary;
use crate::spectral::lsf::{LineSpreadFunction, LsfFitConfig};

/// Geometry and signal level of a synthetic scene
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSetup {
    pub map_shape: (usize, usize),
    /// Pixels on the reference wavelength grid
    pub n_wavelength: usize,
    /// log10 of the first reference wavelength (Å)
    pub logl_start: f64,
    pub dlogl: f64,
    /// Extra model pixels on each side of the reference range
    pub model_margin: usize,
    pub ebv_galactic: f64,
    /// SNR per pixel at the disc centre
    pub peak_snr: f64,
    /// Flat part of the rotation curve (km/s)
    pub rotation_kms: f64,
    /// Spectral resolution at 5000 Å
    pub resolution_5000: f64,
    /// Change of resolution per Å
    pub resolution_slope: f64,
}

impl Default for SyntheticSetup {
    fn default() -> Self {
        Self {
            map_shape: (9, 9),
            n_wavelength: 1200,
            logl_start: 3.72,
            dlogl: 1.0e-4,
            model_margin: 300,
            ebv_galactic: 0.03,
            peak_snr: 30.0,
            rotation_kms: 150.0,
            resolution_5000: 1800.0,
            resolution_slope: 0.3,
        }
    }
}

impl SyntheticSetup {
    /// A few spaxels and a short grid, for tests
    pub fn small() -> Self {
        Self {
            map_shape: (3, 3),
            n_wavelength: 300,
            logl_start: 3.74,
            model_margin: 120,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let (rows, cols) = self.map_shape;
        if rows == 0 || cols == 0 || self.n_wavelength < 2 {
            return Err(IfuSimError::EmptyInput("synthetic scene geometry"));
        }
        if !(self.dlogl.is_finite() && self.dlogl > 0.0) {
            return Err(IfuSimError::invalid(
                "dlogl",
                format!("must be positive, got {}", self.dlogl),
            ));
        }
        if !(self.peak_snr.is_finite() && self.peak_snr > 0.0) {
            return Err(IfuSimError::invalid(
                "peak_snr",
                format!("must be positive, got {}", self.peak_snr),
            ));
        }
        Ok(())
    }

    /// Reference wavelengths (Å)
    pub fn reference_wavelength(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n_wavelength, |k| {
            10f64.powf(self.logl_start + k as f64 * self.dlogl)
        })
    }

    /// Rest-frame model wavelengths (Å), widened by the margin on each side
    pub fn model_wavelength(&self) -> Array1<f64> {
        let start = self.logl_start - self.model_margin as f64 * self.dlogl;
        Array1::from_shape_fn(self.n_wavelength + 2 * self.model_margin, |k| {
            10f64.powf(start + k as f64 * self.dlogl)
        })
    }

    fn resolution(&self, wavelength: f64) -> f64 {
        self.resolution_5000 + self.resolution_slope * (wavelength - 5000.0)
    }

    fn centre(&self) -> (f64, f64) {
        let (rows, cols) = self.map_shape;
        ((rows as f64 - 1.0) / 2.0, (cols as f64 - 1.0) / 2.0)
    }

    /// Whether a spaxel lies inside the circular footprint
    fn in_footprint(&self, i: usize, j: usize) -> bool {
        let (ci, cj) = self.centre();
        let radius = self.map_shape.0.min(self.map_shape.1) as f64 / 2.0 - 0.25;
        let (di, dj) = (i as f64 - ci, j as f64 - cj);
        (di * di + dj * dj).sqrt() <= radius
    }

    /// Disc surface brightness relative to the centre
    fn surface_brightness(&self, i: usize, j: usize) -> f64 {
        let (ci, cj) = self.centre();
        let scale = self.map_shape.0.max(self.map_shape.1) as f64 / 4.0;
        let r = ((i as f64 - ci).powi(2) + (j as f64 - cj).powi(2)).sqrt();
        (-r / scale).exp()
    }
}

/// Smooth stellar-like continuum with a handful of familiar absorption lines
fn continuum(wavelength: f64) -> f64 {
    const LINES: [(f64, f64, f64); 5] = [
        (4861.0, 0.25, 4.0),
        (5175.0, 0.20, 6.0),
        (5270.0, 0.10, 3.0),
        (5893.0, 0.30, 4.0),
        (6563.0, 0.35, 5.0),
    ];
    let slope = (wavelength / 5500.0).powf(-1.0);
    LINES.iter().fold(slope, |acc, &(centre, depth, sigma)| {
        let d = (wavelength - centre) / sigma;
        acc * (1.0 - depth * (-0.5 * d * d).exp())
    })
}

fn normal(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev).map_err(|e| IfuSimError::invalid("noise level", e.to_string()))
}

/// Observed reference exposure
pub fn reference_cube(setup: &SyntheticSetup, seed: u64) -> Result<ReferenceCube> {
    setup.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let (rows, cols) = setup.map_shape;
    let wavelength = setup.reference_wavelength();
    let nl = wavelength.len();

    let sigma = 1.0 / setup.peak_snr;
    let noise = normal(sigma)?;
    let spectrum = wavelength.mapv(continuum);

    let mut flux = Array3::zeros((nl, rows, cols));
    for ((l, i, j), f) in flux.indexed_iter_mut() {
        let signal = if setup.in_footprint(i, j) {
            setup.surface_brightness(i, j) * spectrum[l]
        } else {
            0.0
        };
        *f = signal + noise.sample(&mut rng);
    }
    let ivar = Array3::from_elem((nl, rows, cols), 1.0 / (sigma * sigma));

    let resolution_noise = 0.01 * setup.resolution_5000;
    let res_dist = normal(resolution_noise)?;
    let spectral_resolution = wavelength.mapv(|l| setup.resolution(l) + res_dist.sample(&mut rng));
    let spectral_resolution_uncertainty = Array1::from_elem(nl, resolution_noise);

    let r_image = Array2::from_shape_fn((rows, cols), |(i, j)| {
        if setup.in_footprint(i, j) {
            setup.surface_brightness(i, j)
        } else {
            0.0
        }
    });

    Ok(ReferenceCube {
        flux,
        ivar,
        wavelength,
        spectral_resolution,
        spectral_resolution_uncertainty,
        ebv_galactic: setup.ebv_galactic,
        r_image,
    })
}

/// Rotating disc: `v = v_flat · tanh(x / r_turn)` along the column axis
pub fn velocity_map(setup: &SyntheticSetup) -> VelocityMap {
    let (rows, cols) = setup.map_shape;
    let (_, cj) = setup.centre();
    let r_turn = (cols as f64 / 6.0).max(0.5);
    VelocityMap {
        velocity_kms: Array2::from_shape_fn((rows, cols), |(_, j)| {
            setup.rotation_kms * ((j as f64 - cj) / r_turn).tanh()
        }),
        valid: Array2::from_shape_fn((rows, cols), |(i, j)| setup.in_footprint(i, j)),
    }
}

/// Rest-frame model on the widened grid, with seeded extra absorption lines
pub fn model_spectrum(setup: &SyntheticSetup, seed: u64) -> Result<ModelSpectrum> {
    setup.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let wavelength = setup.model_wavelength();
    let (lo, hi) = (wavelength[0], wavelength[wavelength.len() - 1]);

    let extra: Vec<(f64, f64, f64)> = (0..12)
        .map(|_| {
            (
                rng.gen_range(lo..hi),
                rng.gen_range(0.05..0.3),
                rng.gen_range(2.0..6.0),
            )
        })
        .collect();
    let flux = wavelength.mapv(|l| {
        extra.iter().fold(continuum(l), |acc, &(centre, depth, sigma)| {
            let d = (l - centre) / sigma;
            acc * (1.0 - depth * (-0.5 * d * d).exp())
        })
    });

    Ok(ModelSpectrum::uniform(wavelength, flux))
}

/// Sky spectra on the reference grid: faint continuum plus night-sky lines
pub fn sky_library(setup: &SyntheticSetup, n_spectra: usize, seed: u64) -> Result<SkyLibrary> {
    setup.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let wavelength = setup.reference_wavelength();
    let lines = [5577.3, 5889.9, 6300.3, 6363.8];
    let sigma = 0.01;
    let noise = normal(sigma)?;

    let mut flux = Array2::zeros((n_spectra, wavelength.len()));
    for mut row in flux.rows_mut() {
        let level = rng.gen_range(0.02..0.08);
        let strengths: Vec<f64> = lines.iter().map(|_| rng.gen_range(0.1..1.0)).collect();
        for (f, &l) in row.iter_mut().zip(wavelength.iter()) {
            let emission: f64 = lines
                .iter()
                .zip(&strengths)
                .map(|(&c, &a)| a * (-0.5 * ((l - c) / 2.0).powi(2)).exp())
                .sum();
            *f = level + emission + noise.sample(&mut rng);
        }
    }
    let ivar = Array2::from_elem(flux.raw_dim(), 1.0 / (sigma * sigma));
    SkyLibrary::new(wavelength, flux, ivar)
}

/// First `q` orthonormal cosine modes over `window` pixels, shape (q, window)
pub fn cosine_basis(q: usize, window: usize) -> Array2<f64> {
    let n = window as f64;
    Array2::from_shape_fn((q, window), |(m, k)| {
        let norm = if m == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        norm * (PI * m as f64 * (k as f64 + 0.5) / n).cos()
    })
}

/// Everything the pipeline needs for one synthetic object
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub reference: ReferenceCube,
    pub velocity: VelocityMap,
    pub model: ModelSpectrum,
    /// LSF fitted to the reference's own resolution column
    pub lsf: LineSpreadFunction,
}

impl SyntheticScene {
    pub fn generate(setup: &SyntheticSetup, seed: u64) -> Result<Self> {
        let reference = reference_cube(setup, seed)?;
        let velocity = velocity_map(setup);
        let model = model_spectrum(setup, seed.wrapping_add(1))?;
        let lsf = LineSpreadFunction::fit(
            reference.wavelength.view(),
            reference.spectral_resolution.view(),
            reference.spectral_resolution_uncertainty.view(),
            &LsfFitConfig::default(),
        )?;
        Ok(Self {
            reference,
            velocity,
            model,
            lsf,
        })
    }
}
