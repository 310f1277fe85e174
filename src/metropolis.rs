use faer::{Col, Mat};
use rand::Rng;
use rayon::prelude::*;

use crate::energy::{add_in_place, label_probability, EnergyModel};
use crate::gaussian::{NotPositiveDefinite, Precision};
use crate::math::logaddexp;
use crate::priors::Priors;

/// Metropolis-Hastings acceptance test.
///
/// A NaN ratio (both targets degenerate) fails both comparisons and rejects.
pub(crate) fn accept<R: Rng + ?Sized>(
    log_target_prop: f64,
    log_target_prev: f64,
    rng: &mut R,
) -> bool {
    let ratio = (log_target_prop - log_target_prev).exp();
    ratio > 1.0 || rng.random::<f64>() < ratio
}

/// Sum over sites of `ln sum_l coef[x, l] N(x; mu_l, S_l)`.
///
/// The spatially derived component coefficients stand in for the mixture
/// weights. Accumulated in log space through `logaddexp`; a zero coefficient
/// contributes nothing.
pub(crate) fn sum_log_mixture_density(
    comp_coef: &Mat<f64>,
    observations: &[Col<f64>],
    means: &[Col<f64>],
    precisions: &[Precision],
) -> f64 {
    let n_labels = means.len();
    observations
        .par_iter()
        .enumerate()
        .map(|(x, obs)| {
            let mut site_density = f64::NEG_INFINITY;
            for l in 0..n_labels {
                let coef = comp_coef.col_as_slice(l)[x];
                if coef <= 0.0 {
                    continue;
                }
                site_density = logaddexp(
                    site_density,
                    coef.ln() + precisions[l].log_density(obs, &means[l]),
                );
            }
            site_density
        })
        .sum()
}

/// Sequential per-label mean updates. Later labels evaluate their ratio
/// against the already updated working set. Returns the accepted count.
pub(crate) fn update_means<R: Rng + ?Sized>(
    priors: &Priors,
    comp_coef: &Mat<f64>,
    observations: &[Col<f64>],
    means: &mut [Col<f64>],
    proposals: &[Col<f64>],
    precisions: &[Precision],
    rng: &mut R,
) -> usize {
    let mut accepted = 0;
    for l in 0..means.len() {
        let lp_prev = priors.log_prior_mean(&means[l], l);
        let lp_prop = priors.log_prior_mean(&proposals[l], l);

        let lmd_prev = sum_log_mixture_density(comp_coef, observations, means, precisions);
        let mut candidate = means.to_vec();
        candidate[l] = proposals[l].clone();
        let lmd_prop = sum_log_mixture_density(comp_coef, observations, &candidate, precisions);

        if accept(lmd_prop + lp_prop, lmd_prev + lp_prev, rng) {
            means[l] = proposals[l].clone();
            accepted += 1;
        }
    }
    accepted
}

/// Sequential per-label covariance updates, run after the mean updates.
///
/// A proposal whose reconstruction already failed, or whose prior or density
/// evaluation degenerates, is rejected without touching the iteration.
#[allow(clippy::too_many_arguments)]
pub(crate) fn update_covariances<R: Rng + ?Sized>(
    priors: &Priors,
    comp_coef: &Mat<f64>,
    observations: &[Col<f64>],
    means: &[Col<f64>],
    covariances: &mut [Mat<f64>],
    precisions: &mut [Precision],
    proposals: &[Result<Mat<f64>, NotPositiveDefinite>],
    rng: &mut R,
) -> usize {
    let mut accepted = 0;
    for l in 0..covariances.len() {
        let Ok(proposal) = &proposals[l] else {
            continue;
        };
        let block = covariance_block(
            priors,
            comp_coef,
            observations,
            means,
            covariances,
            precisions,
            proposal,
            l,
            rng,
        );
        if let Ok(true) = block {
            accepted += 1;
        }
    }
    accepted
}

#[allow(clippy::too_many_arguments)]
fn covariance_block<R: Rng + ?Sized>(
    priors: &Priors,
    comp_coef: &Mat<f64>,
    observations: &[Col<f64>],
    means: &[Col<f64>],
    covariances: &mut [Mat<f64>],
    precisions: &mut [Precision],
    proposal: &Mat<f64>,
    label: usize,
    rng: &mut R,
) -> Result<bool, NotPositiveDefinite> {
    let lp_prev = priors.log_prior_covariance(&covariances[label], label)?;
    let lp_prop = priors.log_prior_covariance(proposal, label)?;
    let precision_prop = Precision::from_covariance(proposal)?;

    let lmd_prev = sum_log_mixture_density(comp_coef, observations, means, precisions);
    let mut candidate = precisions.to_vec();
    candidate[label] = precision_prop.clone();
    let lmd_prop = sum_log_mixture_density(comp_coef, observations, means, &candidate);

    if accept(lmd_prop + lp_prop, lmd_prev + lp_prev, rng) {
        covariances[label] = proposal.clone();
        precisions[label] = precision_prop;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Global beta update. The candidate side recomputes the Gibbs energy and
/// component coefficients under the proposed beta with the freshly drawn
/// labels. Returns the beta to append and whether the proposal was taken.
#[allow(clippy::too_many_arguments)]
pub(crate) fn update_beta<R: Rng + ?Sized>(
    energy: &EnergyModel,
    priors: &Priors,
    labels: &[usize],
    comp_coef: &Mat<f64>,
    means: &[Col<f64>],
    precisions: &[Precision],
    beta_prev: &Col<f64>,
    beta_prop: Col<f64>,
    temperature: f64,
    rng: &mut R,
) -> (Col<f64>, bool) {
    let lp_prev = priors.log_prior_beta(beta_prev);
    let lp_prop = priors.log_prior_beta(&beta_prop);

    let lmd_prev = sum_log_mixture_density(comp_coef, energy.observations(), means, precisions);

    let mut energy_prop = energy.gibbs_energy(labels, &beta_prop);
    add_in_place(&mut energy_prop, &energy.self_energy());
    let coef_prop = label_probability(&energy_prop, temperature);
    let lmd_prop = sum_log_mixture_density(&coef_prop, energy.observations(), means, precisions);

    if accept(lmd_prop + lp_prop, lmd_prev + lp_prev, rng) {
        (beta_prop, true)
    } else {
        (beta_prev.clone(), false)
    }
}
