use faer::{Col, Mat, Side};
use itertools::izip;
use thiserror::Error;

use crate::math::LN_2PI;

/// A covariance matrix degenerated numerically.
///
/// This is the recoverable error of the sampler: wherever it surfaces during
/// proposal reconstruction, prior evaluation or density evaluation, the
/// affected parameter block is rejected and the iteration continues.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("matrix is not positive definite")]
pub struct NotPositiveDefinite;

/// Inverse and log-determinant of a symmetric positive definite matrix.
///
/// Backed by a self-adjoint eigendecomposition so that positive definiteness
/// is checked once, where the factorization happens, instead of surfacing as
/// NaN downstream.
#[derive(Debug, Clone)]
pub(crate) struct Precision {
    inverse: Mat<f64>,
    log_det: f64,
    dim: usize,
}

impl Precision {
    pub(crate) fn from_covariance(cov: &Mat<f64>) -> Result<Self, NotPositiveDefinite> {
        let n = cov.nrows();
        let evd = cov.selfadjoint_eigendecomposition(Side::Lower);
        let vals = evd.s().column_vector().to_owned();
        let vecs = evd.u().to_owned();
        let mut log_det = 0.0;
        for &v in vals.as_slice() {
            if !v.is_finite() || v <= 0.0 {
                return Err(NotPositiveDefinite);
            }
            log_det += v.ln();
        }
        let vals = vals.as_slice();
        let inverse = Mat::from_fn(n, n, |i, j| {
            (0..n)
                .map(|k| vecs.col_as_slice(k)[i] * vecs.col_as_slice(k)[j] / vals[k])
                .sum()
        });
        Ok(Precision {
            inverse,
            log_det,
            dim: n,
        })
    }

    pub(crate) fn log_det(&self) -> f64 {
        self.log_det
    }

    pub(crate) fn inverse_diagonal(&self, i: usize) -> f64 {
        self.inverse.col_as_slice(i)[i]
    }

    /// Mahalanobis quadratic form `diff^T S^-1 diff`.
    pub(crate) fn quad_form(&self, diff: &[f64]) -> f64 {
        let mut acc = 0.0;
        for (j, &dj) in diff.iter().enumerate() {
            let col = self.inverse.col_as_slice(j);
            for (i, &di) in diff.iter().enumerate() {
                acc += di * col[i] * dj;
            }
        }
        acc
    }

    /// Full multivariate normal log-density of `x` under mean `mean` and the
    /// covariance this precision was built from.
    pub(crate) fn log_density(&self, x: &Col<f64>, mean: &Col<f64>) -> f64 {
        let diff: Vec<f64> = izip!(x.as_slice(), mean.as_slice())
            .map(|(a, b)| a - b)
            .collect();
        -0.5 * (self.dim as f64 * LN_2PI + self.log_det + self.quad_form(&diff))
    }
}
