//! Signal-to-noise characterisation and SNR-scaled noise

use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};
use rand_distr::{Distribution, StandardNormal};
use shared::algo::{
    median_filter_1d, process_array_in_parallel_chunks, validate_window, StatsError,
};

use crate::error::Result;
use crate::spectral::field::ensure_same_shape;

/// Running-median window used to smooth the per-pixel SNR
pub const DEFAULT_SNR_WINDOW: usize = 15;

/// Keeps the noise amplitude finite where the SNR is zero
const SNR_EPSILON: f64 = 1.0e-6;

/// Smoothed SNR cube of an observation and the per-spaxel rms it implies
#[derive(Debug, Clone)]
pub struct SnrCharacterisation {
    /// (wavelength, row, col)
    pub snr: Array3<f64>,
    /// `1 / mean_λ(snr)` per spaxel; infinite where the spaxel has no signal
    pub rms: Array2<f64>,
}

/// Zero-padded running median along the wavelength axis of every spaxel.
pub fn median_filter_cube(cube: ArrayView3<f64>, window: usize) -> Result<Array3<f64>> {
    validate_window(window)?;

    let mut out = Array3::zeros(cube.raw_dim());
    let status = Zip::from(out.lanes_mut(Axis(0)))
        .and(cube.lanes(Axis(0)))
        .par_map_collect(|mut out_lane, lane| -> std::result::Result<(), StatsError> {
            let filtered = median_filter_1d(&lane.to_vec(), window)?;
            out_lane
                .iter_mut()
                .zip(filtered)
                .for_each(|(o, v)| *o = v);
            Ok(())
        });
    if let Some(err) = status.iter().find_map(|r| r.as_ref().err()) {
        return Err(err.clone().into());
    }
    Ok(out)
}

/// SNR cube of an observation.
///
/// The per-pixel SNR `|flux| · sqrt(ivar)` (non-finite products count as
/// zero) is smoothed with a zero-padded running median of odd length
/// `window` along wavelength.
pub fn snr_cube(
    flux: ArrayView3<f64>,
    ivar: ArrayView3<f64>,
    window: usize,
) -> Result<SnrCharacterisation> {
    ensure_same_shape("snr_cube ivar", &flux, &ivar)?;

    let raw = Zip::from(&flux).and(&ivar).par_map_collect(|&f, &iv| {
        let s = f.abs() * iv.sqrt();
        if s.is_finite() {
            s
        } else {
            0.0
        }
    });
    let snr = median_filter_cube(raw.view(), window)?;

    let rms = snr
        .mean_axis(Axis(0))
        .map(|mean| mean.mapv(|m| 1.0 / m))
        .unwrap_or_else(|| Array2::zeros((snr.len_of(Axis(1)), snr.len_of(Axis(2)))));

    Ok(SnrCharacterisation { snr, rms })
}

/// Noise `N(0, 1) / (snr + ε) · flux` for every pixel of a cube.
///
/// Draws are made in seeded chunks of wavelength planes, so the result is
/// fixed by `seed`.
pub fn snr_scaled_noise(
    flux: ArrayView3<f64>,
    snr: ArrayView3<f64>,
    seed: u64,
) -> Result<Array3<f64>> {
    ensure_same_shape("snr_scaled_noise snr", &flux, &snr)?;

    let mut noise = process_array_in_parallel_chunks(
        Array3::zeros(flux.raw_dim()),
        seed,
        Some(64),
        |chunk, rng| {
            chunk
                .iter_mut()
                .for_each(|v| *v = StandardNormal.sample(rng));
        },
    );

    Zip::from(&mut noise)
        .and(&flux)
        .and(&snr)
        .par_for_each(|n, &f, &s| *n = *n / (s + SNR_EPSILON) * f);
    Ok(noise)
}
