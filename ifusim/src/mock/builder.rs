//! Mock-cube synthesis pipeline.
//!
//! [`MockCubeBuilder::build`] turns a noiseless model spectrum (or cube of
//! spectra) and an observed reference exposure into a mock observation with
//! the reference's geometry, wavelength grid, instrumental blur and noise:
//!
//! 1. SNR characterisation of the reference
//! 2. redshift map `(1+z_cosmo)(1+v/c) - 1`, optional velocity broadening and
//!    redshifting of the model (first resampled onto a log grid with the
//!    reference step when it is sampled any other way)
//! 3. Galactic attenuation
//! 4. LSF blur with widths evaluated at the redshifted wavelengths
//! 5. regridding onto the reference grid, then per-spaxel normalisation to
//!    unit mean; pixels no usable model sample reached end with zero ivar
//! 6. correlated and SNR-scaled noise
//! 7. flux scaling to the reference band flux, ivar from the reference SNR
//! 8. optional sky
//! 9. masking
//!
//! Per-spaxel degeneracies never abort a build; they are counted in the
//! returned [`MockReport`].

use ndarray::{s, Array1, Array2, Array3, ArrayView1, Axis, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::algo::resample_linear;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{IfuSimError, Result};
use crate::mock::config::MockConfig;
use crate::mock::mask::{apply_mask, MaskSummary};
use crate::mock::reference::{ReferenceCube, ReferenceSource, VelocityMap};
use crate::noise::covariance::{noise_field, CovarianceMap, CovarianceSynthesizer, LOW_SNR_THRESHOLD};
use crate::noise::sky::SkyLibrary;
use crate::noise::snr::{snr_cube, snr_scaled_noise, SnrCharacterisation};
use crate::photometry::extinction::{ExtinctionLaw, TabulatedExtinction};
use crate::photometry::flux_scale::{flux_ratio, BandPhotometry, BoxcarBand};
use crate::spectral::convolve::{
    clip_widths, convolve_cube, gaussian_filter, velocity_dispersion_widths, zero_boundary,
    zero_boundary_cube, EdgeMode,
};
use crate::spectral::field::SpectrumOrField;
use crate::spectral::grid::LogWavelengthGrid;
use crate::spectral::lsf::LineSpreadFunction;
use crate::spectral::redshift::{redshift_cube, Redshift, SPEED_OF_LIGHT_KMS};
use crate::spectral::regrid::{Regridder, STEP_TOLERANCE};

/// Offsets that keep the noise and sky streams independent of each other.
/// Chunked draws use `seed + chunk_index`, so the streams sit far apart.
const SNR_NOISE_SEED_OFFSET: u64 = 1 << 32;
const SKY_SEED_OFFSET: u64 = 2 << 32;

/// A noiseless model in its rest frame, on any increasing wavelength grid
#[derive(Debug, Clone)]
pub struct ModelSpectrum {
    /// Rest-frame wavelengths (Å)
    pub wavelength: Array1<f64>,
    /// One spectrum for every spaxel, or a (wavelength, row, col) cube
    pub flux: SpectrumOrField,
}

impl ModelSpectrum {
    pub fn uniform(wavelength: Array1<f64>, flux: Array1<f64>) -> Self {
        Self {
            wavelength,
            flux: SpectrumOrField::Uniform(flux),
        }
    }

    /// Log grid the model is sampled on, if it is log-uniform
    pub fn grid(&self) -> Result<LogWavelengthGrid> {
        LogWavelengthGrid::from_wavelengths(self.wavelength.view())
    }

    /// The model on a log grid of step `dlogl`.
    ///
    /// A model already log-uniform at that step is returned unchanged.
    /// Anything else is linearly resampled in log wavelength onto a grid
    /// that starts at the first model wavelength and stops at or before the
    /// last one.
    pub fn on_log_grid(&self, dlogl: f64) -> Result<(LogWavelengthGrid, SpectrumOrField)> {
        let n_model = self.wavelength.len();
        if self.flux.spectral_len() != n_model {
            return Err(IfuSimError::shape_mismatch(
                "model flux",
                &[n_model],
                &[self.flux.spectral_len()],
            ));
        }
        if let Ok(grid) = self.grid() {
            if (grid.dlogl() - dlogl).abs() <= STEP_TOLERANCE * dlogl {
                return Ok((grid, self.flux.clone()));
            }
        }

        if n_model < 2 {
            return Err(IfuSimError::EmptyInput("model wavelengths"));
        }
        if let Some((index, &value)) = self
            .wavelength
            .iter()
            .enumerate()
            .find(|(_, w)| !(w.is_finite() && **w > 0.0))
        {
            return Err(IfuSimError::IrregularGrid(format!(
                "model wavelength {value} at index {index} is not positive"
            )));
        }
        let logl: Vec<f64> = self.wavelength.iter().map(|w| w.log10()).collect();
        let (first, last) = (logl[0], logl[n_model - 1]);
        if !(last > first) {
            return Err(IfuSimError::IrregularGrid(
                "model wavelengths must increase".to_string(),
            ));
        }

        // The slack keeps a node that rounding puts a hair past the table;
        // the clamp below brings it back onto the last sample
        let n = ((last - first) / dlogl + 1.0e-6).floor() as usize + 1;
        let grid = LogWavelengthGrid::new(first, dlogl, n)?;
        let targets: Vec<f64> = grid.log_values().iter().map(|&l| l.min(last)).collect();
        let resample = |lane: ArrayView1<f64>| -> Result<Array1<f64>> {
            Ok(Array1::from(resample_linear(&logl, &lane.to_vec(), &targets, 0.0)?))
        };

        let flux = match &self.flux {
            SpectrumOrField::Uniform(spec) => SpectrumOrField::Uniform(resample(spec.view())?),
            SpectrumOrField::Field(cube) => {
                let (_, rows, cols) = cube.dim();
                let mut out = Array3::zeros((n, rows, cols));
                for i in 0..rows {
                    for j in 0..cols {
                        out.slice_mut(s![.., i, j])
                            .assign(&resample(cube.slice(s![.., i, j]))?);
                    }
                }
                SpectrumOrField::Field(out)
            }
        };
        log::debug!("Resampled {n_model} model samples onto {n} log pixels of step {dlogl:e}");
        Ok((grid, flux))
    }
}

/// Degeneracies met while building one mock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockReport {
    /// Spaxels whose mean reference SNR is below the covariance threshold
    pub n_low_snr_spaxels: usize,
    /// LSF widths raised to the width floor
    pub n_clipped_widths: usize,
    /// Output pixels no usable model sample reached; their ivar is zero
    pub n_out_of_range_pixels: usize,
    /// Band fluxes replaced before the flux ratio was taken
    pub n_replaced_band_fluxes: usize,
    /// Covariance noise was requested but no covariance was attached
    pub covariance_noise_skipped: bool,
    pub mask: MaskSummary,
}

/// A finished mock observation
#[derive(Debug, Clone)]
pub struct MockCube {
    /// (wavelength, row, col) on the reference grid
    pub flux: Array3<f64>,
    pub ivar: Array3<f64>,
    /// Reference wavelengths (Å)
    pub wavelength: Array1<f64>,
    /// Total redshift applied at each spaxel
    pub redshift_map: Array2<f64>,
    /// Per-spaxel reduced-basis covariance, when a synthesizer is attached
    pub reduced_covariance: Option<CovarianceMap>,
    pub report: MockReport,
}

/// Builds mock cubes from a shared LSF model and pluggable collaborators
pub struct MockCubeBuilder {
    config: MockConfig,
    lsf: Arc<LineSpreadFunction>,
    extinction: Box<dyn ExtinctionLaw>,
    photometry: Box<dyn BandPhotometry>,
    noise_covariance: Option<Array2<f64>>,
    reduced_covariance: Option<CovarianceSynthesizer>,
    sky: Option<SkyLibrary>,
}

impl MockCubeBuilder {
    /// New builder with the diffuse Milky-Way extinction curve and an
    /// r-band top-hat for flux scaling.
    pub fn new(config: MockConfig, lsf: Arc<LineSpreadFunction>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            lsf,
            extinction: Box::new(TabulatedExtinction::diffuse_milky_way()),
            photometry: Box::new(BoxcarBand::sdss_r()),
            noise_covariance: None,
            reduced_covariance: None,
            sky: None,
        })
    }

    pub fn with_extinction(mut self, law: Box<dyn ExtinctionLaw>) -> Self {
        self.extinction = law;
        self
    }

    pub fn with_photometry(mut self, band: Box<dyn BandPhotometry>) -> Self {
        self.photometry = band;
        self
    }

    /// Full-resolution spectral covariance on the reference grid, used for
    /// the correlated noise field.
    pub fn with_noise_covariance(mut self, cov: Array2<f64>) -> Self {
        self.noise_covariance = Some(cov);
        self
    }

    /// Attach a reduced-basis synthesizer whose window spans the reference grid.
    pub fn with_reduced_covariance(mut self, synthesizer: CovarianceSynthesizer) -> Self {
        self.reduced_covariance = Some(synthesizer);
        self
    }

    pub fn with_sky(mut self, sky: SkyLibrary) -> Self {
        self.sky = Some(sky);
        self
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn lsf(&self) -> &LineSpreadFunction {
        &self.lsf
    }

    /// Load reference data for `id` and build a mock from it.
    pub fn build_from_source(
        &self,
        model: &ModelSpectrum,
        source: &dyn ReferenceSource,
        id: &str,
    ) -> Result<MockCube> {
        let reference = source.load_reference_cube(id)?;
        let velocity = source.load_velocity_map(id)?;
        log::info!("Building mock for reference {id}");
        self.build(model, &reference, &velocity)
    }

    /// Run the full pipeline for one reference exposure.
    ///
    /// # Errors
    /// * `ShapeMismatch` if the model, reference and velocity map disagree
    /// * `IrregularGrid` if the reference grid is not log-uniform or the
    ///   model wavelengths do not increase
    /// * `InvalidRedshift` if a spaxel's total redshift is ≤ -1
    /// * any collaborator failure
    pub fn build(
        &self,
        model: &ModelSpectrum,
        reference: &ReferenceCube,
        velocity: &VelocityMap,
    ) -> Result<MockCube> {
        let started = Instant::now();
        let cfg = &self.config;

        reference.validate()?;
        let map_shape = reference.map_shape();
        if velocity.map_shape() != map_shape || velocity.valid.dim() != map_shape {
            return Err(IfuSimError::shape_mismatch(
                "velocity map",
                &[map_shape.0, map_shape.1],
                velocity.velocity_kms.shape(),
            ));
        }
        model
            .flux
            .check_compatible("model flux", model.wavelength.len(), map_shape)?;
        let target_grid = LogWavelengthGrid::from_wavelengths(reference.wavelength.view())?;
        let (model_grid, model_flux) = model.on_log_grid(target_grid.dlogl())?;
        let model_wavelength = model_grid.wavelengths();
        let mut report = MockReport::default();

        // 1. reference SNR
        let snr = snr_cube(reference.flux.view(), reference.ivar.view(), cfg.snr_window)?;
        let mean_snr = snr.rms.mapv(|rms| 1.0 / rms);
        report.n_low_snr_spaxels = mean_snr
            .iter()
            .filter(|&&s| !(s >= LOW_SNR_THRESHOLD))
            .count();

        // 2. redshift
        let z_cosmo = Redshift::new(cfg.z_cosmo)?;
        let redshift_map = velocity
            .usable_velocity()
            .mapv(|v| z_cosmo.one_plus() * (1.0 + v / SPEED_OF_LIGHT_KMS) - 1.0);
        let mut unit_ivar = Array1::<f64>::ones(model_grid.len());
        let rest_flux = match cfg.velocity_dispersion_kms {
            Some(sigma) if sigma > 0.0 => {
                let (broadened, widths) = self.broaden(&model_flux, model_grid.dlogl(), sigma)?;
                if cfg.edge_mode == EdgeMode::Zero {
                    zero_boundary(unit_ivar.view_mut(), widths.view());
                }
                broadened
            }
            _ => model_flux,
        };
        let shifted = redshift_cube(
            model_wavelength.view(),
            &rest_flux,
            &SpectrumOrField::Uniform(unit_ivar),
            redshift_map.view(),
        )?;

        // 3. Galactic attenuation
        let atten = self
            .extinction
            .attenuation_cube(shifted.wavelength.view(), reference.ebv_galactic)?;
        let mut flux = shifted.flux;
        let mut ivar = shifted.ivar;
        Zip::from(&mut flux)
            .and(&mut ivar)
            .and(&atten)
            .par_for_each(|f, v, &a| {
                *f *= a;
                *v /= a * a;
            });

        // 4. instrumental blur
        let widths = self
            .lsf
            .width_field(shifted.wavelength.view(), model_grid.dlogl(), 0.0)?;
        let clipped = clip_widths(widths.view(), cfg.width_floor);
        report.n_clipped_widths = clipped.n_clipped;
        let widths = SpectrumOrField::Field(clipped.widths);
        let blurred = convolve_cube(flux.view(), &widths, cfg.edge_mode)?;
        if cfg.edge_mode == EdgeMode::Zero {
            zero_boundary_cube(ivar.view_mut(), &widths)?;
        }

        // 5. regrid and normalise
        let src_logl = SpectrumOrField::Field(shifted.wavelength.mapv(f64::log10));
        let regridded = Regridder::new(target_grid, cfg.regrid_strategy).regrid(
            &src_logl,
            blurred.view(),
            ivar.view(),
        )?;
        report.n_out_of_range_pixels = regridded.n_uncovered();
        let covered = regridded.covered;
        let mut flux = regridded.flux;
        normalise_to_unit_mean(&mut flux, &covered);

        // 6. noise
        report.covariance_noise_skipped = self.add_noise(&mut flux, &snr, map_shape)?;

        // 7. flux scaling
        let reference_band = self
            .photometry
            .band_flux(reference.wavelength.view(), reference.flux.view())?;
        let mock_band = self
            .photometry
            .band_flux(reference.wavelength.view(), flux.view())?;
        let scale = flux_ratio(reference_band.view(), mock_band.view())?;
        report.n_replaced_band_fluxes = scale.n_replaced_reference + scale.n_replaced_model;
        flux *= &scale.ratio.view().insert_axis(Axis(0));
        let mut ivar = Zip::from(&snr.snr)
            .and(&flux)
            .par_map_collect(|&s, &f| (s / f).powi(2));
        Zip::from(&mut ivar).and(&covered).par_for_each(|v, &c| {
            if !c {
                *v = 0.0;
            }
        });

        // 8. sky
        if cfg.add_sky {
            match &self.sky {
                Some(sky) => {
                    sky.ensure_grid(reference.wavelength.view())?;
                    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(SKY_SEED_OFFSET));
                    flux += &sky.sky_cube(map_shape, &mut rng).flux;
                }
                None => log::warn!("Sky requested but no sky library attached; skipping"),
            }
        }

        // 9. masking
        report.mask = apply_mask(
            &mut flux,
            &mut ivar,
            reference.r_image.view(),
            velocity.usable_mask().view(),
            cfg.median_fill_window,
        )?;

        let reduced_covariance = match &self.reduced_covariance {
            Some(synthesizer) => Some(self.reduced_covariance_map(synthesizer, &ivar, &mean_snr)?),
            None => None,
        };

        log::debug!(
            "Mock built in {:?}: {} low-SNR spaxels, {} clipped widths, {} uncovered pixels, \
             {} masked spaxels",
            started.elapsed(),
            report.n_low_snr_spaxels,
            report.n_clipped_widths,
            report.n_out_of_range_pixels,
            report.mask.n_masked_spaxels()
        );

        Ok(MockCube {
            flux,
            ivar,
            wavelength: reference.wavelength.clone(),
            redshift_map,
            reduced_covariance,
            report,
        })
    }

    /// Kinematic broadening of the rest-frame model, with the widths used
    fn broaden(
        &self,
        flux: &SpectrumOrField,
        dlogl: f64,
        sigma_kms: f64,
    ) -> Result<(SpectrumOrField, Array1<f64>)> {
        let n = flux.spectral_len();
        let widths = velocity_dispersion_widths(
            sigma_kms,
            dlogl,
            Array1::zeros(n).view(),
            self.config.width_floor,
        )?;
        let edge = self.config.edge_mode;
        let broadened = match flux {
            SpectrumOrField::Uniform(spec) => {
                SpectrumOrField::Uniform(gaussian_filter(spec.view(), widths.view(), edge)?)
            }
            SpectrumOrField::Field(cube) => SpectrumOrField::Field(convolve_cube(
                cube.view(),
                &SpectrumOrField::Uniform(widths.clone()),
                edge,
            )?),
        };
        Ok((broadened, widths))
    }

    /// Correlated plus SNR-scaled noise, both drawn against the noiseless flux.
    /// Returns whether requested covariance noise had to be skipped.
    fn add_noise(
        &self,
        flux: &mut Array3<f64>,
        snr: &SnrCharacterisation,
        map_shape: (usize, usize),
    ) -> Result<bool> {
        let cfg = &self.config;
        let random = if cfg.add_snr_noise {
            Some(snr_scaled_noise(
                flux.view(),
                snr.snr.view(),
                cfg.seed.wrapping_add(SNR_NOISE_SEED_OFFSET),
            )?)
        } else {
            None
        };

        let mut skipped = false;
        if cfg.add_covariance_noise {
            match &self.noise_covariance {
                Some(cov) => {
                    let nl = flux.len_of(Axis(0));
                    if cov.dim() != (nl, nl) {
                        return Err(IfuSimError::shape_mismatch(
                            "noise covariance",
                            &[nl, nl],
                            cov.shape(),
                        ));
                    }
                    *flux += &noise_field(cov.view(), map_shape, cfg.seed)?;
                }
                None => {
                    log::warn!(
                        "Covariance noise requested but no noise covariance attached; skipping"
                    );
                    skipped = true;
                }
            }
        }
        if let Some(random) = random {
            *flux += &random;
        }
        Ok(skipped)
    }

    fn reduced_covariance_map(
        &self,
        synthesizer: &CovarianceSynthesizer,
        ivar: &Array3<f64>,
        mean_snr: &Array2<f64>,
    ) -> Result<CovarianceMap> {
        let nl = ivar.len_of(Axis(0));
        if synthesizer.window() != nl {
            return Err(IfuSimError::shape_mismatch(
                "reduced covariance window",
                &[nl],
                &[synthesizer.window()],
            ));
        }
        let offsets = Array2::zeros(mean_snr.raw_dim());
        synthesizer.covariance_map(offsets.view(), ivar.view(), mean_snr.view())
    }
}

/// Divide each spaxel by its mean over covered pixels; empty spaxels stay zero.
fn normalise_to_unit_mean(flux: &mut Array3<f64>, covered: &Array3<bool>) {
    Zip::from(flux.lanes_mut(Axis(0)))
        .and(covered.lanes(Axis(0)))
        .par_for_each(|mut lane, cov| {
            let (sum, count) = lane
                .iter()
                .zip(cov.iter())
                .filter(|(_, &c)| c)
                .fold((0.0, 0usize), |(s, n), (&f, _)| (s + f, n + 1));
            let mean = sum / count as f64;
            if count > 0 && mean.is_finite() && mean != 0.0 {
                lane.mapv_inplace(|f| f / mean);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::synthetic::{SyntheticScene, SyntheticSetup};
    use approx::assert_relative_eq;
    use ndarray::s;

    fn scene() -> SyntheticScene {
        SyntheticScene::generate(&SyntheticSetup::small(), 11).unwrap()
    }

    fn builder(scene: &SyntheticScene, config: MockConfig) -> MockCubeBuilder {
        MockCubeBuilder::new(config, Arc::new(scene.lsf.clone())).unwrap()
    }

    #[test]
    fn test_noiseless_mock_is_scaled_to_reference() {
        let scene = scene();
        let config = MockConfig {
            add_snr_noise: false,
            ..MockConfig::default()
        };
        let mock = builder(&scene, config)
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();

        let (nl, rows, cols) = scene.reference.flux.dim();
        assert_eq!(mock.flux.dim(), (nl, rows, cols));
        assert_eq!(mock.ivar.dim(), (nl, rows, cols));
        assert!(mock.flux.iter().all(|f| f.is_finite()));
        assert!(mock.ivar.iter().all(|v| v.is_finite() && *v >= 0.0));

        // Band flux of every footprint spaxel matches the reference
        let band = BoxcarBand::sdss_r();
        let ref_band = band
            .band_flux(scene.reference.wavelength.view(), scene.reference.flux.view())
            .unwrap();
        let mock_band = band
            .band_flux(mock.wavelength.view(), mock.flux.view())
            .unwrap();
        for ((i, j), &r) in ref_band.indexed_iter() {
            if scene.reference.r_image[[i, j]] != 0.0 && r > 0.0 {
                assert_relative_eq!(mock_band[[i, j]], r, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_redshift_map_combines_cosmological_and_peculiar() {
        let scene = scene();
        let config = MockConfig {
            z_cosmo: 0.02,
            add_snr_noise: false,
            ..MockConfig::default()
        };
        let mock = builder(&scene, config)
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();

        let v = scene.velocity.usable_velocity();
        for ((i, j), &z) in mock.redshift_map.indexed_iter() {
            let expected = 1.02 * (1.0 + v[[i, j]] / SPEED_OF_LIGHT_KMS) - 1.0;
            assert_relative_eq!(z, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_masked_spaxels_have_no_information() {
        let mut scene = scene();
        scene.reference.r_image[[0, 0]] = 0.0;
        scene.velocity.valid[[1, 1]] = false;
        let mock = builder(&scene, MockConfig::default())
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();

        assert!(mock.flux.slice(s![.., 0, 0]).iter().all(|&f| f == 0.0));
        assert!(mock.ivar.slice(s![.., 0, 0]).iter().all(|&v| v == 0.0));
        assert!(mock.ivar.slice(s![.., 1, 1]).iter().all(|&v| v == 0.0));
        assert!(mock.report.mask.n_masked_spaxels() >= 2);
    }

    #[test]
    fn test_same_seed_same_mock() {
        let scene = scene();
        let config = MockConfig {
            seed: 5,
            ..MockConfig::default()
        };
        let b = builder(&scene, config);
        let a = b
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();
        let c = b
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();
        assert_eq!(a.flux, c.flux);
        assert_eq!(a.ivar, c.ivar);
    }

    #[test]
    fn test_covariance_noise_must_match_grid() {
        let scene = scene();
        let b = builder(&scene, MockConfig::default()).with_noise_covariance(Array2::eye(3));
        let err = b.build(&scene.model, &scene.reference, &scene.velocity);
        assert!(matches!(err, Err(IfuSimError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_missing_noise_covariance_is_reported() {
        let scene = scene();
        let skipped = builder(&scene, MockConfig::default())
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();
        assert!(skipped.report.covariance_noise_skipped);

        let nl = scene.reference.n_wavelengths();
        let attached = builder(&scene, MockConfig::default())
            .with_noise_covariance(Array2::<f64>::eye(nl) * 1.0e-6)
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();
        assert!(!attached.report.covariance_noise_skipped);

        let off = MockConfig {
            add_covariance_noise: false,
            ..MockConfig::default()
        };
        let not_requested = builder(&scene, off)
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();
        assert!(!not_requested.report.covariance_noise_skipped);
    }

    #[test]
    fn test_mismatched_velocity_map_is_rejected() {
        let scene = scene();
        let velocity = VelocityMap::at_rest((1, 1));
        let err = builder(&scene, MockConfig::default()).build(
            &scene.model,
            &scene.reference,
            &velocity,
        );
        assert!(matches!(err, Err(IfuSimError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_model_on_linear_grid_is_resampled() {
        let scene = scene();
        let wave = scene.model.wavelength.to_vec();
        let linear = Array1::<f64>::linspace(wave[0], wave[wave.len() - 1], wave.len());
        let flux = resample_linear(
            &wave,
            &scene.model.flux.lane(0, 0).to_vec(),
            &linear.to_vec(),
            0.0,
        )
        .unwrap();
        let model = ModelSpectrum::uniform(linear, Array1::from(flux));
        assert!(model.grid().is_err());

        let config = MockConfig {
            add_snr_noise: false,
            ..MockConfig::default()
        };
        let b = builder(&scene, config);
        let resampled = b
            .build(&model, &scene.reference, &scene.velocity)
            .unwrap();
        let native = b
            .build(&scene.model, &scene.reference, &scene.velocity)
            .unwrap();

        assert_eq!(resampled.report.n_out_of_range_pixels, 0);
        let centre = resampled.flux.slice(s![.., 1, 1]);
        let expected = native.flux.slice(s![.., 1, 1]);
        let mut total = 0.0;
        for (&got, &want) in centre.iter().zip(expected.iter()) {
            assert_relative_eq!(got, want, max_relative = 0.05);
            total += ((got - want) / want).abs();
        }
        assert!(total / (centre.len() as f64) < 5e-3);
    }

    #[test]
    fn test_on_log_grid_resamples_coarse_log_model() {
        let dlogl = 1.0e-4;
        // Log-uniform at twice the target step, flux linear in log wavelength
        let wavelength = Array1::from_shape_fn(51, |i| 10f64.powf(3.7 + 2.0 * dlogl * i as f64));
        let flux = wavelength.mapv(|w| 1.0 + (w.log10() - 3.7) / dlogl);
        let model = ModelSpectrum::uniform(wavelength, flux);

        let (grid, resampled) = model.on_log_grid(dlogl).unwrap();
        assert_eq!(grid.len(), 101);
        assert_relative_eq!(grid.dlogl(), dlogl);
        for (k, &f) in resampled.lane(0, 0).iter().enumerate() {
            assert_relative_eq!(f, 1.0 + k as f64, epsilon = 1e-6);
        }

        // Already on the target step: untouched
        let (same, flux) = model.on_log_grid(2.0 * dlogl).unwrap();
        assert_eq!(same.len(), 51);
        assert_eq!(flux.lane(0, 0), model.flux.lane(0, 0));

        let backwards = ModelSpectrum::uniform(
            Array1::from(vec![6000.0, 5000.0, 4000.0]),
            Array1::<f64>::ones(3),
        );
        assert!(matches!(
            backwards.on_log_grid(dlogl),
            Err(IfuSimError::IrregularGrid(_))
        ));
    }

    #[test]
    fn test_model_edge_inside_reference_carries_no_information() {
        let setup = SyntheticSetup::small();
        let scene = scene();
        // The truncated model starts at reference pixel 40
        let skip = setup.model_margin + 40;
        let model = ModelSpectrum::uniform(
            scene.model.wavelength.slice(s![skip..]).to_owned(),
            scene.model.flux.lane(0, 0).slice(s![skip..]).to_owned(),
        );
        let config = MockConfig {
            seed: 3,
            ..MockConfig::default()
        };
        let mock = builder(&scene, config)
            .build(&model, &scene.reference, &VelocityMap::at_rest(setup.map_shape))
            .unwrap();

        assert!(mock.report.n_out_of_range_pixels > 0);
        // Pixel 40 holds the first model pixel, a zeroed convolution boundary
        for lane in mock.ivar.lanes(Axis(0)) {
            assert!(lane.iter().take(41).all(|&v| v == 0.0));
        }
        assert!(mock.ivar.slice(s![100..250, 1, 1]).iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_normalise_ignores_uncovered_pixels() {
        let mut flux = Array3::from_shape_vec((4, 1, 1), vec![0.0, 2.0, 4.0, 0.0]).unwrap();
        let covered = Array3::from_shape_vec((4, 1, 1), vec![false, true, true, false]).unwrap();
        normalise_to_unit_mean(&mut flux, &covered);
        assert_eq!(flux.iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0 / 3.0, 4.0 / 3.0, 0.0]);
    }
}
