use faer::{Col, Mat};
use itertools::izip;

use crate::gaussian::{NotPositiveDefinite, Precision};
use crate::math::norm_logpdf;

/// Variance of the diagonal normal prior on every mean component.
const MEAN_PRIOR_VARIANCE: f64 = 100.0;
/// Variance `kesi` of the log-normal prior on each per-feature scale.
const SCALE_PRIOR_VARIANCE: f64 = 100.0;
/// Standard deviation of the normal prior on beta.
const BETA_PRIOR_STD: f64 = 100.0;

/// Fixed prior distributions, built once from the initial mixture state.
///
/// The covariance prior factors each matrix into per-feature scales and a
/// correlation matrix: an inverse-Wishart style term with `nu` degrees of
/// freedom on the correlation structure, and an independent log-normal term
/// on each scale with location `b_sigma` and variance `kesi`.
#[derive(Debug, Clone)]
pub struct Priors {
    beta_mean: f64,
    beta_std: f64,
    mean_centers: Vec<Col<f64>>,
    mean_variance: f64,
    b_sigma: Vec<Col<f64>>,
    kesi: Vec<Col<f64>>,
    nu: f64,
}

impl Priors {
    /// Derive the fixed hyperparameters from the initializer's output: the
    /// mean priors center on the initial means, `b_sigma` on the log of the
    /// initial per-feature standard deviations, and the beta prior on the
    /// initial coupling strength.
    pub fn from_initial_state(
        beta_init: f64,
        means: &[Col<f64>],
        covariances: &[Mat<f64>],
    ) -> Self {
        let n_feat = means[0].nrows();
        let b_sigma = covariances
            .iter()
            .map(|cov| Col::from_fn(n_feat, |f| 0.5 * cov.col_as_slice(f)[f].ln()))
            .collect();
        let kesi = covariances
            .iter()
            .map(|_| Col::from_fn(n_feat, |_| SCALE_PRIOR_VARIANCE))
            .collect();
        Priors {
            beta_mean: beta_init,
            beta_std: BETA_PRIOR_STD,
            mean_centers: means.to_vec(),
            mean_variance: MEAN_PRIOR_VARIANCE,
            b_sigma,
            kesi,
            nu: n_feat as f64 + 1.0,
        }
    }

    /// Log-density of a label's mean vector under its fixed prior.
    pub fn log_prior_mean(&self, mean: &Col<f64>, label: usize) -> f64 {
        let std = self.mean_variance.sqrt();
        izip!(mean.as_slice(), self.mean_centers[label].as_slice())
            .map(|(&m, &center)| norm_logpdf(m, center, std))
            .sum()
    }

    /// Log-density of the spatial-coupling parameter under its normal prior.
    pub fn log_prior_beta(&self, beta: &Col<f64>) -> f64 {
        norm_logpdf(beta.as_slice()[0], self.beta_mean, self.beta_std)
    }

    /// Log-density of a label's covariance matrix.
    ///
    /// Degenerate input (non-positive diagonal, singular correlation) is the
    /// recoverable error: the caller rejects the block and moves on.
    pub fn log_prior_covariance(
        &self,
        cov: &Mat<f64>,
        label: usize,
    ) -> Result<f64, NotPositiveDefinite> {
        let n_feat = cov.nrows();
        let scales: Vec<f64> = (0..n_feat).map(|f| cov.col_as_slice(f)[f].sqrt()).collect();
        if scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(NotPositiveDefinite);
        }
        let corr = Mat::from_fn(n_feat, n_feat, |i, j| {
            cov.col_as_slice(j)[i] / (scales[i] * scales[j])
        });
        let corr_precision = Precision::from_covariance(&corr)?;
        let mut sum_log_diag_inv = 0.0;
        for f in 0..n_feat {
            let d = corr_precision.inverse_diagonal(f);
            if !d.is_finite() || d <= 0.0 {
                return Err(NotPositiveDefinite);
            }
            sum_log_diag_inv += d.ln();
        }
        let logp_corr = -0.5 * (self.nu + n_feat as f64 + 1.0) * corr_precision.log_det()
            - 0.5 * self.nu * sum_log_diag_inv;
        let logp_scales: f64 = izip!(
            scales.iter(),
            self.b_sigma[label].as_slice(),
            self.kesi[label].as_slice()
        )
        .map(|(&scale, &location, &kesi)| norm_logpdf(scale.ln(), location, kesi.sqrt()))
        .sum();
        Ok(logp_corr + logp_scales)
    }
}
