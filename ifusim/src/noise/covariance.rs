//! Spectral covariance in a reduced basis, and correlated noise fields.
//!
//! # Per-spaxel covariance
//!
//! A full-resolution kernel `K` (for example the LSF correlation matrix)
//! describes how neighbouring pixels co-vary. For one spaxel, the
//! `window × window` block starting at that spaxel's offset is copied, its
//! diagonal replaced by the spaxel's own variances, and the block projected
//! onto a `q`-dimensional basis `E`:
//!
//! ```text
//! C = E · B · Eᵀ        (q × q)
//! ```
//!
//! Spaxels whose SNR is below one get the fixed, deliberately uninformative
//! `100 · I` instead.
//!
//! # Noise fields
//!
//! [`noise_field`] draws one zero-mean Gaussian vector per spatial location
//! from a `q × q` covariance `Σ = V Λ Vᵀ`, as `x = V Λ^½ z` with `z ~ N(0, I)`.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use shared::algo::process_array_in_parallel_chunks;

use crate::error::{IfuSimError, Result};

/// Spaxels below this SNR get the fallback covariance
pub const LOW_SNR_THRESHOLD: f64 = 1.0;

/// Diagonal of the low-SNR fallback covariance
pub const LOW_SNR_VARIANCE: f64 = 100.0;

const IVAR_MIN: f64 = 1.0e-6;
const IVAR_MAX: f64 = 1.0e6;

/// Eigenvalues above `-EIGEN_TOLERANCE · max(λ)` are round-off and clamped to zero
const EIGEN_TOLERANCE: f64 = 1.0e-10;

/// Largest accepted asymmetry, relative to the largest matrix element
const SYMMETRY_TOLERANCE: f64 = 1.0e-8;

/// Covariance of one spaxel in the reduced basis
#[derive(Debug, Clone, PartialEq)]
pub struct SpaxelCovariance {
    pub matrix: Array2<f64>,
    /// True when the low-SNR fallback was used
    pub low_snr: bool,
}

/// Reduced covariances of every spaxel of a map
#[derive(Debug, Clone)]
pub struct CovarianceMap {
    /// (row, col, q, q)
    pub matrices: Array4<f64>,
    pub low_snr: Array2<bool>,
}

impl CovarianceMap {
    pub fn n_low_snr(&self) -> usize {
        self.low_snr.iter().filter(|&&b| b).count()
    }
}

/// Projects blocks of a full-resolution kernel onto a reduced basis
#[derive(Debug, Clone)]
pub struct CovarianceSynthesizer {
    kernel: Array2<f64>,
    basis: Array2<f64>,
}

impl CovarianceSynthesizer {
    /// # Arguments
    /// * `kernel` - Square full-resolution covariance kernel
    /// * `basis` - Reduced basis `E`, shape (q, window), `window ≤ kernel size`
    pub fn new(kernel: Array2<f64>, basis: Array2<f64>) -> Result<Self> {
        let (n, m) = kernel.dim();
        if n != m {
            return Err(IfuSimError::shape_mismatch(
                "covariance kernel (must be square)",
                &[n, n],
                &[n, m],
            ));
        }
        let (q, window) = basis.dim();
        if q == 0 || window == 0 {
            return Err(IfuSimError::EmptyInput("reduced basis"));
        }
        if window > n {
            return Err(IfuSimError::invalid(
                "basis",
                format!("window {window} exceeds kernel size {n}"),
            ));
        }
        Ok(Self { kernel, basis })
    }

    /// Dimension of the reduced basis
    pub fn q(&self) -> usize {
        self.basis.nrows()
    }

    /// Number of full-resolution pixels spanned by the basis
    pub fn window(&self) -> usize {
        self.basis.ncols()
    }

    pub fn kernel(&self) -> ArrayView2<'_, f64> {
        self.kernel.view()
    }

    fn check_offset(&self, offset: usize) -> Result<()> {
        let n = self.kernel.nrows();
        if offset + self.window() > n {
            return Err(IfuSimError::invalid(
                "offset",
                format!(
                    "block [{offset}, {}) exceeds kernel size {n}",
                    offset + self.window()
                ),
            ));
        }
        Ok(())
    }

    /// Reduced covariance of one spaxel.
    ///
    /// # Arguments
    /// * `offset` - First kernel pixel of the spaxel's window
    /// * `ivar` - Scaled inverse variance over the window
    /// * `snr` - Spaxel signal-to-noise ratio
    pub fn spaxel_covariance(
        &self,
        offset: usize,
        ivar: ArrayView1<f64>,
        snr: f64,
    ) -> Result<SpaxelCovariance> {
        self.check_offset(offset)?;
        if ivar.len() != self.window() {
            return Err(IfuSimError::shape_mismatch(
                "spaxel covariance ivar",
                &[self.window()],
                &[ivar.len()],
            ));
        }
        Ok(self.project(offset, ivar, snr))
    }

    fn project(&self, offset: usize, ivar: ArrayView1<f64>, snr: f64) -> SpaxelCovariance {
        let q = self.q();
        if !(snr >= LOW_SNR_THRESHOLD) {
            return SpaxelCovariance {
                matrix: Array2::eye(q) * LOW_SNR_VARIANCE,
                low_snr: true,
            };
        }

        let w = self.window();
        let mut block = self
            .kernel
            .slice(s![offset..offset + w, offset..offset + w])
            .to_owned();
        for (k, &iv) in ivar.iter().enumerate() {
            let iv = if iv.is_finite() { iv } else { IVAR_MIN };
            block[[k, k]] = 1.0 / iv.clamp(IVAR_MIN, IVAR_MAX);
        }

        let c = self.basis.dot(&block).dot(&self.basis.t());
        let matrix = (&c + &c.t()) * 0.5;
        SpaxelCovariance {
            matrix,
            low_snr: false,
        }
    }

    /// Reduced covariance of every spaxel, evaluated in parallel.
    ///
    /// # Arguments
    /// * `offsets` - Window start per spaxel, (row, col)
    /// * `ivar` - Scaled inverse variance, (window, row, col)
    /// * `snr` - SNR per spaxel, (row, col)
    pub fn covariance_map(
        &self,
        offsets: ArrayView2<usize>,
        ivar: ArrayView3<f64>,
        snr: ArrayView2<f64>,
    ) -> Result<CovarianceMap> {
        let (rows, cols) = offsets.dim();
        if snr.dim() != (rows, cols) {
            return Err(IfuSimError::shape_mismatch(
                "covariance SNR map",
                &[rows, cols],
                snr.shape(),
            ));
        }
        if ivar.dim() != (self.window(), rows, cols) {
            return Err(IfuSimError::shape_mismatch(
                "covariance ivar cube",
                &[self.window(), rows, cols],
                ivar.shape(),
            ));
        }
        for &offset in offsets.iter() {
            self.check_offset(offset)?;
        }

        let per_spaxel: Vec<SpaxelCovariance> = (0..rows * cols)
            .into_par_iter()
            .map(|k| {
                let (i, j) = (k / cols, k % cols);
                self.project(offsets[[i, j]], ivar.slice(s![.., i, j]), snr[[i, j]])
            })
            .collect();

        let q = self.q();
        let mut matrices = Array4::zeros((rows, cols, q, q));
        let mut low_snr = Array2::from_elem((rows, cols), false);
        for (k, cov) in per_spaxel.into_iter().enumerate() {
            let (i, j) = (k / cols, k % cols);
            matrices.slice_mut(s![i, j, .., ..]).assign(&cov.matrix);
            low_snr[[i, j]] = cov.low_snr;
        }

        let map = CovarianceMap { matrices, low_snr };
        let n_low = map.n_low_snr();
        if n_low > 0 {
            log::warn!(
                "{n_low} of {} spaxels below SNR {LOW_SNR_THRESHOLD} use the fallback covariance",
                rows * cols
            );
        }
        Ok(map)
    }
}

/// Matrix `A` with `A Aᵀ = cov`, from a symmetric eigendecomposition.
///
/// # Errors
/// * `ShapeMismatch`/`EmptyInput` for a non-square or empty matrix
/// * `InvalidParameter` for non-finite entries
/// * `NotSymmetric` if `cov` is not symmetric
/// * `NotPositiveSemiDefinite` for materially negative eigenvalues
pub fn covariance_factor(cov: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (n, m) = cov.dim();
    if n != m {
        return Err(IfuSimError::shape_mismatch(
            "noise covariance (must be square)",
            &[n, n],
            &[n, m],
        ));
    }
    if n == 0 {
        return Err(IfuSimError::EmptyInput("noise covariance"));
    }
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(IfuSimError::invalid(
            "covariance",
            "contains non-finite entries",
        ));
    }

    let scale = cov.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let asymmetry = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .fold(0.0_f64, |acc, (i, j)| acc.max((cov[[i, j]] - cov[[j, i]]).abs()));
    if asymmetry > SYMMETRY_TOLERANCE * scale {
        return Err(IfuSimError::NotSymmetric(asymmetry));
    }

    let eigen = SymmetricEigen::new(DMatrix::from_fn(n, n, |i, j| cov[[i, j]]));
    let max_eig = eigen.eigenvalues.iter().fold(0.0_f64, |acc, &v| acc.max(v));
    let min_eig = eigen
        .eigenvalues
        .iter()
        .fold(f64::INFINITY, |acc, &v| acc.min(v));
    if min_eig < -EIGEN_TOLERANCE * max_eig {
        return Err(IfuSimError::NotPositiveSemiDefinite(min_eig));
    }

    let sqrt_eig: Vec<f64> = eigen.eigenvalues.iter().map(|&v| v.max(0.0).sqrt()).collect();
    Ok(Array2::from_shape_fn((n, n), |(i, k)| {
        eigen.eigenvectors[(i, k)] * sqrt_eig[k]
    }))
}

/// Correlated zero-mean Gaussian noise, one `q`-vector per spatial location.
///
/// Output is (q, rows, cols). Draws are generated in chunks of map rows, each
/// with its own seeded generator, so a given seed always produces the same
/// field.
pub fn noise_field(
    cov: ArrayView2<f64>,
    map_shape: (usize, usize),
    seed: u64,
) -> Result<Array3<f64>> {
    let factor = covariance_factor(cov)?;
    let q = factor.nrows();
    let (rows, cols) = map_shape;

    let draws = process_array_in_parallel_chunks(
        Array3::zeros((rows, cols, q)),
        seed,
        Some(8),
        |chunk, rng| {
            let mut z = Array1::<f64>::zeros(q);
            for mut lane in chunk.lanes_mut(Axis(2)) {
                z.iter_mut().for_each(|v| *v = StandardNormal.sample(rng));
                lane.assign(&factor.dot(&z));
            }
        },
    );

    Ok(draws
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2, Array3};

    fn exp_kernel(n: usize, scale: f64) -> Array2<f64> {
        Array2::from_shape_fn((n, n), |(i, j)| {
            let d = (i as f64 - j as f64) / scale;
            (-0.5 * d * d).exp()
        })
    }

    fn basis(q: usize, window: usize) -> Array2<f64> {
        Array2::from_shape_fn((q, window), |(k, l)| {
            ((k + 1) as f64 * l as f64 * 0.1).cos() / (window as f64).sqrt()
        })
    }

    #[test]
    fn test_reduced_covariance_is_symmetric() {
        let synth = CovarianceSynthesizer::new(exp_kernel(50, 2.0), basis(4, 20)).unwrap();
        let ivar = Array1::from_shape_fn(20, |i| 1.0 + i as f64);
        let cov = synth.spaxel_covariance(7, ivar.view(), 12.0).unwrap();
        assert!(!cov.low_snr);
        assert_eq!(cov.matrix.dim(), (4, 4));
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(cov.matrix[[i, j]], cov.matrix[[j, i]]);
            }
        }
    }

    #[test]
    fn test_block_diagonal_uses_spaxel_variance() {
        // With an identity basis the projection is the block itself
        let kernel = exp_kernel(6, 1.0);
        let synth = CovarianceSynthesizer::new(kernel.clone(), Array2::eye(3)).unwrap();
        let ivar = array![4.0, f64::NAN, 1.0e9];
        let cov = synth.spaxel_covariance(2, ivar.view(), 5.0).unwrap();

        assert_relative_eq!(cov.matrix[[0, 0]], 0.25);
        assert_relative_eq!(cov.matrix[[1, 1]], 1.0e6);
        assert_relative_eq!(cov.matrix[[2, 2]], 1.0e-6);
        assert_relative_eq!(cov.matrix[[0, 1]], kernel[[2, 3]]);
        // The shared kernel is never modified
        assert_eq!(synth.kernel(), kernel.view());
    }

    #[test]
    fn test_low_snr_fallback_is_exact() {
        let synth = CovarianceSynthesizer::new(exp_kernel(30, 2.0), basis(5, 10)).unwrap();
        let ivar = Array1::<f64>::ones(10);
        let cov = synth.spaxel_covariance(0, ivar.view(), 0.5).unwrap();
        assert!(cov.low_snr);
        assert_eq!(cov.matrix, Array2::<f64>::eye(5) * 100.0);
    }

    #[test]
    fn test_offsets_beyond_kernel_are_rejected() {
        let synth = CovarianceSynthesizer::new(exp_kernel(10, 1.0), basis(2, 5)).unwrap();
        let ivar = Array1::ones(5);
        assert!(synth.spaxel_covariance(6, ivar.view(), 5.0).is_err());
        assert!(synth.spaxel_covariance(5, ivar.view(), 5.0).is_ok());
        assert!(CovarianceSynthesizer::new(exp_kernel(4, 1.0), basis(2, 5)).is_err());
    }

    #[test]
    fn test_covariance_map_matches_single_spaxels() {
        let synth = CovarianceSynthesizer::new(exp_kernel(40, 3.0), basis(3, 12)).unwrap();
        let offsets = array![[0usize, 5], [10, 28]];
        let ivar = Array3::from_shape_fn((12, 2, 2), |(l, i, j)| 1.0 + (l + i + 2 * j) as f64);
        let snr = array![[10.0, 0.2], [3.0, 1.0]];

        let map = synth
            .covariance_map(offsets.view(), ivar.view(), snr.view())
            .unwrap();
        assert_eq!(map.matrices.dim(), (2, 2, 3, 3));
        assert_eq!(map.n_low_snr(), 1);
        assert!(map.low_snr[[0, 1]]);

        let single = synth
            .spaxel_covariance(10, ivar.slice(s![.., 1, 0]), 3.0)
            .unwrap();
        assert_eq!(map.matrices.slice(s![1, 0, .., ..]), single.matrix);
    }

    #[test]
    fn test_noise_field_is_reproducible_and_correlated() {
        let cov = array![[2.0, 1.2], [1.2, 1.0]];
        let a = noise_field(cov.view(), (60, 60), 17).unwrap();
        let b = noise_field(cov.view(), (60, 60), 17).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dim(), (2, 60, 60));

        let n = 3600.0;
        let x0 = a.index_axis(Axis(0), 0);
        let x1 = a.index_axis(Axis(0), 1);
        let var0 = x0.iter().map(|v| v * v).sum::<f64>() / n;
        let var1 = x1.iter().map(|v| v * v).sum::<f64>() / n;
        let cov01 = x0.iter().zip(x1.iter()).map(|(u, v)| u * v).sum::<f64>() / n;
        assert_relative_eq!(var0, 2.0, max_relative = 0.1);
        assert_relative_eq!(var1, 1.0, max_relative = 0.1);
        assert_relative_eq!(cov01, 1.2, max_relative = 0.15);

        let other = noise_field(cov.view(), (60, 60), 18).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_singular_covariance_is_accepted() {
        // Rank one: both components identical
        let cov = array![[1.0, 1.0], [1.0, 1.0]];
        let field = noise_field(cov.view(), (4, 4), 3).unwrap();
        for (u, v) in field
            .index_axis(Axis(0), 0)
            .iter()
            .zip(field.index_axis(Axis(0), 1).iter())
        {
            assert_relative_eq!(u, v, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_invalid_covariances() {
        let asym = array![[1.0, 0.5], [0.2, 1.0]];
        assert!(matches!(
            noise_field(asym.view(), (2, 2), 0),
            Err(IfuSimError::NotSymmetric(_))
        ));
        let indefinite = array![[1.0, 0.0], [0.0, -1.0]];
        assert!(matches!(
            noise_field(indefinite.view(), (2, 2), 0),
            Err(IfuSimError::NotPositiveSemiDefinite(_))
        ));
        let rect = Array2::<f64>::zeros((2, 3));
        assert!(noise_field(rect.view(), (2, 2), 0).is_err());
        let nan = array![[f64::NAN, 0.0], [0.0, 1.0]];
        assert!(noise_field(nan.view(), (2, 2), 0).is_err());
    }
}
