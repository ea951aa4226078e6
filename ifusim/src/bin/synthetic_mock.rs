//! Build mock IFU cubes from seeded synthetic reference exposures

use clap::Parser;
use ifusim::mock::synthetic::{cosine_basis, sky_library, SyntheticScene, SyntheticSetup};
use ifusim::mock::{InMemoryReferenceSource, MockConfig, MockCubeBuilder};
use ifusim::noise::covariance::CovarianceSynthesizer;
use ifusim::spectral::RegridStrategy;
use ifusim::ErrorKind;
use ndarray::Array1;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Synthesize mock IFU datacubes from synthetic references")]
struct Args {
    /// JSON pipeline configuration; command-line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this path and continue
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Number of synthetic objects to build
    #[arg(long, default_value_t = 3)]
    objects: usize,

    /// Map size in spaxels (square)
    #[arg(long, default_value_t = 9)]
    map_size: usize,

    /// Pixels on the reference wavelength grid
    #[arg(long, default_value_t = 1200)]
    n_wavelength: usize,

    /// Cosmological redshift
    #[arg(long)]
    z_cosmo: Option<f64>,

    /// Regridding strategy (nearest, invdistwt)
    #[arg(long)]
    strategy: Option<RegridStrategy>,

    /// Velocity dispersion applied to the model (km/s)
    #[arg(long)]
    sigma_v: Option<f64>,

    /// Add sky spectra from a synthetic sky library
    #[arg(long, default_value_t = false)]
    sky: bool,

    /// Add correlated noise from the LSF covariance kernel
    #[arg(long, default_value_t = false)]
    covariance_noise: bool,

    /// Reduced-basis size for per-spaxel covariance output (0 disables)
    #[arg(long, default_value_t = 0)]
    basis_size: usize,

    /// Base random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Args {
    fn mock_config(&self) -> Result<MockConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => MockConfig::load_from_file(path)?,
            None => MockConfig::default(),
        };
        if let Some(z) = self.z_cosmo {
            config.z_cosmo = z;
        }
        if let Some(strategy) = self.strategy {
            config.regrid_strategy = strategy;
        }
        if self.sigma_v.is_some() {
            config.velocity_dispersion_kms = self.sigma_v;
        }
        config.add_sky = config.add_sky || self.sky;
        config.add_covariance_noise = config.add_covariance_noise && self.covariance_noise;
        config.seed = self.seed;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = args.mock_config()?;
    if let Some(path) = &args.save_config {
        config.save_to_file(path)?;
        println!("Saved configuration to {}", path.display());
    }

    let setup = SyntheticSetup {
        map_shape: (args.map_size, args.map_size),
        n_wavelength: args.n_wavelength,
        ..SyntheticSetup::default()
    };

    // Every object shares one LSF, fitted from all reference cubes
    let mut source = InMemoryReferenceSource::new();
    let mut references = Vec::with_capacity(args.objects);
    let mut model = None;
    for k in 0..args.objects {
        let scene = SyntheticScene::generate(&setup, args.seed.wrapping_add(100 * k as u64))?;
        references.push(scene.reference.clone());
        source.insert(format!("synthetic-{k}"), scene.reference, scene.velocity);
        model.get_or_insert(scene.model);
    }
    let model = model.ok_or("at least one object is required")?;
    let lsf = Arc::new(ifusim::LineSpreadFunction::fit_from_cubes(
        &references,
        &config.lsf,
    )?);
    println!(
        "LSF fitted from {} calibration rows (length scale {:.0} Å)",
        lsf.n_calibration_rows(),
        lsf.length_scale()
    );

    let mut builder = MockCubeBuilder::new(config.clone(), Arc::clone(&lsf))?;
    let wavelength = setup.reference_wavelength();
    if config.add_sky {
        builder = builder.with_sky(sky_library(&setup, 20, args.seed)?);
    }
    if config.add_covariance_noise || args.basis_size > 0 {
        let dlambda = pixel_widths(&wavelength);
        let kernel = lsf.covariance_kernel(wavelength.view(), dlambda.view())?;
        if config.add_covariance_noise {
            builder = builder.with_noise_covariance(&kernel * 1.0e-4);
        }
        if args.basis_size > 0 {
            let basis = cosine_basis(args.basis_size, wavelength.len());
            builder = builder.with_reduced_covariance(CovarianceSynthesizer::new(kernel, basis)?);
        }
    }

    let mut ids: Vec<String> = source.ids().map(str::to_string).collect();
    ids.sort();
    for id in &ids {
        let mock = match builder.build_from_source(&model, &source, id) {
            Ok(mock) => mock,
            Err(e) if e.kind() == ErrorKind::Domain => {
                log::warn!("Skipping {id}: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let usable = mock.ivar.iter().filter(|&&v| v > 0.0).count();
        let mean_flux = mock.flux.iter().sum::<f64>() / mock.flux.len() as f64;
        let (z_lo, z_hi) = mock
            .redshift_map
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &z| {
                (lo.min(z), hi.max(z))
            });
        println!("\n=== {id} ===");
        println!("  cube shape:        {:?}", mock.flux.shape());
        println!("  redshift range:    {z_lo:.6} .. {z_hi:.6}");
        println!("  mean flux:         {mean_flux:.4}");
        println!(
            "  usable pixels:     {usable} / {} ({:.1}%)",
            mock.ivar.len(),
            100.0 * usable as f64 / mock.ivar.len() as f64
        );
        println!("  low-SNR spaxels:   {}", mock.report.n_low_snr_spaxels);
        println!("  clipped widths:    {}", mock.report.n_clipped_widths);
        println!("  uncovered pixels:  {}", mock.report.n_out_of_range_pixels);
        println!("  masked spaxels:    {}", mock.report.mask.n_masked_spaxels());
        if let Some(cov) = &mock.reduced_covariance {
            println!("  fallback covariances: {}", cov.n_low_snr());
        }
    }

    Ok(())
}

/// Width of each pixel in Å from the spacing of its neighbours
fn pixel_widths(wavelength: &Array1<f64>) -> Array1<f64> {
    let n = wavelength.len();
    Array1::from_shape_fn(n, |k| {
        let lo = wavelength[k.saturating_sub(1)];
        let hi = wavelength[(k + 1).min(n - 1)];
        (hi - lo) / ((k + 1).min(n - 1) - k.saturating_sub(1)) as f64
    })
}
