use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use faer::{Col, Mat};
use indicatif::ProgressBar;
use log::debug;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use thiserror::Error;

use crate::energy::{add_in_place, label_probability, EnergyModel};
use crate::gaussian::{NotPositiveDefinite, Precision};
use crate::graph::{NeighborGraph, PhysicalDim};
use crate::init::{select_label_count, MixtureInit, MixtureInitializer};
use crate::metropolis::{update_beta, update_covariances, update_means};
use crate::priors::Priors;
use crate::proposal::{propose_beta, propose_covariances, propose_means};
use crate::trace::{Snapshot, Trace};

/// Fatal construction errors, surfaced before any sampling state exists.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("coordinate rows ({coordinates}) and observation rows ({observations}) differ")]
    ShapeMismatch {
        coordinates: usize,
        observations: usize,
    },
    #[error("coordinates and observations must be finite")]
    NonFinite,
    #[error("at least one label is required")]
    NoLabels,
    #[error("observations must have at least one feature")]
    NoFeatures,
    #[error("at least two sites are required to build a neighborhood")]
    TooFewSites,
    #[error("{0}-dimensional neighborhoods are not implemented")]
    UnsupportedDimension(usize),
    #[error("initializer output does not match the requested shape")]
    MalformedInit,
    #[error("initializer failed")]
    Init(#[from] anyhow::Error),
}

/// Fatal errors from `fit`. Numerical trouble inside a parameter block never
/// lands here; it rejects the block and the run continues.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("jump lengths must be non-negative and finite, temperature positive")]
    InvalidOptions,
    #[error("sampler state degenerated numerically at iteration {iteration}")]
    Degenerate { iteration: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    /// Progress bar over iterations.
    Summary,
    /// Progress bar plus per-iteration energy and acceptance output on the
    /// `log` facade.
    EnergyTrace,
}

/// Tuning knobs for one `fit` call. The jump lengths are the variances of
/// the random-walk proposals.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub beta_jump_length: f64,
    pub mean_jump_length: f64,
    pub cov_scale_jump_length: f64,
    pub cov_rotation_jump_length: f64,
    pub temperature: f64,
    pub verbosity: Verbosity,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            beta_jump_length: 10.0,
            mean_jump_length: 0.0005,
            cov_scale_jump_length: 0.00005,
            cov_rotation_jump_length: 0.0005,
            temperature: 1.0,
            verbosity: Verbosity::Quiet,
        }
    }
}

impl FitOptions {
    fn validate(&self) -> Result<(), FitError> {
        let jumps = [
            self.beta_jump_length,
            self.mean_jump_length,
            self.cov_scale_jump_length,
            self.cov_rotation_jump_length,
        ];
        if jumps.iter().any(|j| !j.is_finite() || *j < 0.0)
            || !self.temperature.is_finite()
            || self.temperature <= 0.0
        {
            return Err(FitError::InvalidOptions);
        }
        Ok(())
    }
}

/// Acceptance bookkeeping for one sweep, for callers that watch convergence.
#[derive(Debug, Clone, Copy)]
pub struct SweepStats {
    pub accepted_means: usize,
    pub accepted_covariances: usize,
    pub accepted_beta: bool,
    pub mean_total_energy: f64,
}

#[derive(Error, Debug)]
enum SweepError {
    #[error(transparent)]
    Degenerate(#[from] NotPositiveDefinite),
    #[error("label probabilities are not sampleable")]
    BadWeights,
}

/// Spatial segmentation sampler: a hidden Markov random field coupling the
/// labels of neighboring sites, a Gaussian mixture likelihood, and Gibbs
/// sweeps with per-block Metropolis-Hastings updates for the means,
/// covariances and the coupling strength beta.
///
/// The random source is injected so that runs are reproducible; a seeded
/// `rand_chacha::ChaCha8Rng` reproduces the full accept/reject sequence.
#[derive(Clone)]
pub struct Segmenter<R: Rng> {
    energy: EnergyModel,
    priors: Priors,
    dim: PhysicalDim,
    n_labels: usize,
    trace: Trace,
    rng: R,
    stop: Arc<AtomicBool>,
    last_stats: Option<SweepStats>,
}

impl<R: Rng> Segmenter<R> {
    /// Validate the inputs, run the initializer and seed the trace with its
    /// output as iteration zero.
    pub fn new<I>(
        coordinates: Mat<f64>,
        observations: Mat<f64>,
        n_labels: usize,
        beta_init: f64,
        initializer: &mut I,
        rng: R,
    ) -> Result<Self, BuildError>
    where
        I: MixtureInitializer + ?Sized,
    {
        if n_labels == 0 {
            return Err(BuildError::NoLabels);
        }
        if coordinates.nrows() != observations.nrows() {
            return Err(BuildError::ShapeMismatch {
                coordinates: coordinates.nrows(),
                observations: observations.nrows(),
            });
        }
        let n_feat = observations.ncols();
        if n_feat == 0 {
            return Err(BuildError::NoFeatures);
        }
        if !all_finite(&coordinates) || !all_finite(&observations) || !beta_init.is_finite() {
            return Err(BuildError::NonFinite);
        }

        let dim = PhysicalDim::from_coordinate_columns(coordinates.ncols())?;
        let graph = NeighborGraph::build(&coordinates)?;

        let init = initializer.initialize(&observations, n_labels)?;
        validate_init(&init, observations.nrows(), n_labels, n_feat)?;

        let priors = Priors::from_initial_state(beta_init, &init.means, &init.covariances);
        let energy = EnergyModel::new(&observations, graph, n_labels);
        let beta = Col::from_fn(dim.beta_dim(), |_| beta_init);
        let trace = Trace::new(Snapshot {
            labels: init.labels,
            means: init.means,
            covariances: init.covariances,
            beta,
        });

        Ok(Segmenter {
            energy,
            priors,
            dim,
            n_labels,
            trace,
            rng,
            stop: Arc::new(AtomicBool::new(false)),
            last_stats: None,
        })
    }

    /// Like [`Segmenter::new`], with the label count chosen over a candidate
    /// range by the initializer's model-order score (lower is better).
    pub fn with_selected_label_count<I>(
        coordinates: Mat<f64>,
        observations: Mat<f64>,
        candidates: RangeInclusive<usize>,
        beta_init: f64,
        initializer: &mut I,
        rng: R,
    ) -> Result<Self, BuildError>
    where
        I: MixtureInitializer + ?Sized,
    {
        let n_labels = select_label_count(initializer, &observations, candidates);
        Self::new(
            coordinates,
            observations,
            n_labels,
            beta_init,
            initializer,
            rng,
        )
    }

    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    pub fn physical_dim(&self) -> PhysicalDim {
        self.dim
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Cooperative cancellation handle. Setting it ends `fit` after the
    /// current sweep completes; a sweep is never interrupted midway.
    pub fn stop_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Acceptance bookkeeping of the most recent sweep, if any ran.
    pub fn last_sweep_stats(&self) -> Option<SweepStats> {
        self.last_stats
    }

    /// Run `n_iter` Gibbs sweeps, appending one snapshot per sweep.
    ///
    /// On success the trace has grown by exactly `n_iter` entries (fewer only
    /// if the stop token was set). On error the trace is consistent through
    /// the last completed sweep.
    pub fn fit(&mut self, n_iter: u64, options: &FitOptions) -> Result<(), FitError> {
        options.validate()?;
        let bar = match options.verbosity {
            Verbosity::Quiet => None,
            _ => Some(ProgressBar::new(n_iter)),
        };

        for _ in 0..n_iter {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let iteration = self.trace.len() as u64;
            let (snapshot, stats) = Self::sweep(
                &self.energy,
                &self.priors,
                self.trace.last(),
                options,
                &mut self.rng,
            )
            .map_err(|_| FitError::Degenerate { iteration })?;

            if options.verbosity == Verbosity::EnergyTrace {
                debug!(
                    "iteration {}: mean total energy {:.4}, accepted {}/{} means, {}/{} covariances, beta {}",
                    iteration,
                    stats.mean_total_energy,
                    stats.accepted_means,
                    self.n_labels,
                    stats.accepted_covariances,
                    self.n_labels,
                    if stats.accepted_beta { "accepted" } else { "kept" },
                );
            }

            self.trace.push(snapshot);
            self.last_stats = Some(stats);
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        Ok(())
    }

    /// One Gibbs sweep against the previous accepted state.
    fn sweep(
        energy: &EnergyModel,
        priors: &Priors,
        prev: &Snapshot,
        options: &FitOptions,
        rng: &mut R,
    ) -> Result<(Snapshot, SweepStats), SweepError> {
        let temperature = options.temperature;

        // The previous covariances are positive definite by construction;
        // a failure here means conditioning collapse, which ends the run.
        let precisions = prev
            .covariances
            .iter()
            .map(Precision::from_covariance)
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = energy.likelihood_energy_with(&prev.means, &precisions);
        add_in_place(&mut total, &energy.self_energy());
        add_in_place(&mut total, &energy.gibbs_energy(&prev.labels, &prev.beta));
        let mean_total_energy = matrix_mean(&total);

        let probability = label_probability(&total, temperature);
        let labels = draw_labels(&probability, rng)?;

        // Component coefficients: the spatial field under the new labels and
        // the previous beta stands in for the mixture weights.
        let mut coef_energy = energy.gibbs_energy(&labels, &prev.beta);
        add_in_place(&mut coef_energy, &energy.self_energy());
        let comp_coef = label_probability(&coef_energy, temperature);

        let beta_prop = propose_beta(&prev.beta, options.beta_jump_length, rng);
        let mean_props = propose_means(&prev.means, options.mean_jump_length, rng);
        let cov_props = propose_covariances(
            &prev.covariances,
            options.cov_scale_jump_length,
            options.cov_rotation_jump_length,
            rng,
        );

        let mut means = prev.means.clone();
        let accepted_means = update_means(
            priors,
            &comp_coef,
            energy.observations(),
            &mut means,
            &mean_props,
            &precisions,
            rng,
        );

        let mut covariances = prev.covariances.clone();
        let mut precisions = precisions;
        let accepted_covariances = update_covariances(
            priors,
            &comp_coef,
            energy.observations(),
            &means,
            &mut covariances,
            &mut precisions,
            &cov_props,
            rng,
        );

        let (beta, accepted_beta) = update_beta(
            energy,
            priors,
            &labels,
            &comp_coef,
            &means,
            &precisions,
            &prev.beta,
            beta_prop,
            temperature,
            rng,
        );

        let stats = SweepStats {
            accepted_means,
            accepted_covariances,
            accepted_beta,
            mean_total_energy,
        };
        Ok((
            Snapshot {
                labels,
                means,
                covariances,
                beta,
            },
            stats,
        ))
    }
}

fn draw_labels<R: Rng>(probability: &Mat<f64>, rng: &mut R) -> Result<Vec<usize>, SweepError> {
    let n_sites = probability.nrows();
    let n_labels = probability.ncols();
    let mut row = vec![0f64; n_labels];
    let mut labels = Vec::with_capacity(n_sites);
    for x in 0..n_sites {
        for (l, slot) in row.iter_mut().enumerate() {
            *slot = probability.col_as_slice(l)[x];
        }
        let dist = WeightedIndex::new(&row).map_err(|_| SweepError::BadWeights)?;
        labels.push(dist.sample(rng));
    }
    Ok(labels)
}

fn matrix_mean(m: &Mat<f64>) -> f64 {
    let entries = (m.nrows() * m.ncols()) as f64;
    let sum: f64 = (0..m.ncols())
        .map(|l| m.col_as_slice(l).iter().sum::<f64>())
        .sum();
    sum / entries
}

fn all_finite(m: &Mat<f64>) -> bool {
    (0..m.ncols()).all(|j| m.col_as_slice(j).iter().all(|v| v.is_finite()))
}

fn validate_init(
    init: &MixtureInit,
    n_sites: usize,
    n_labels: usize,
    n_feat: usize,
) -> Result<(), BuildError> {
    if init.labels.len() != n_sites
        || init.means.len() != n_labels
        || init.covariances.len() != n_labels
    {
        return Err(BuildError::MalformedInit);
    }
    if init.labels.iter().any(|&l| l >= n_labels) {
        return Err(BuildError::MalformedInit);
    }
    if init.means.iter().any(|m| m.nrows() != n_feat) {
        return Err(BuildError::MalformedInit);
    }
    if init
        .covariances
        .iter()
        .any(|c| c.nrows() != n_feat || c.ncols() != n_feat)
    {
        return Err(BuildError::MalformedInit);
    }
    // a degenerate starting covariance would poison every later sweep
    if init
        .covariances
        .iter()
        .any(|c| Precision::from_covariance(c).is_err())
    {
        return Err(BuildError::MalformedInit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    pub(crate) struct FixedInit {
        pub init: MixtureInit,
    }

    impl MixtureInitializer for FixedInit {
        fn initialize(&mut self, _: &Mat<f64>, _: usize) -> anyhow::Result<MixtureInit> {
            Ok(self.init.clone())
        }
    }

    fn two_cluster_setup() -> (Mat<f64>, Mat<f64>, FixedInit) {
        let n = 20;
        let coords = Mat::from_fn(n, 1, |i, _| i as f64);
        let obs = Mat::from_fn(n, 1, |i, _| if i < n / 2 { -3.0 } else { 3.0 });
        let init = MixtureInit {
            labels: (0..n).map(|i| usize::from(i >= n / 2)).collect(),
            means: vec![Col::from_fn(1, |_| -3.0), Col::from_fn(1, |_| 3.0)],
            covariances: vec![Mat::from_fn(1, 1, |_, _| 1.0); 2],
        };
        (coords, obs, FixedInit { init })
    }

    #[test]
    fn construction_validates_inputs() {
        let (coords, obs, mut init) = two_cluster_setup();
        let rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            Segmenter::new(coords.clone(), obs.clone(), 0, 1.0, &mut init, rng.clone()),
            Err(BuildError::NoLabels)
        ));

        let short = Mat::from_fn(3, 1, |i, _| i as f64);
        assert!(matches!(
            Segmenter::new(short, obs.clone(), 2, 1.0, &mut init, rng.clone()),
            Err(BuildError::ShapeMismatch { .. })
        ));

        let bad_obs = Mat::from_fn(20, 1, |i, _| if i == 4 { f64::NAN } else { 0.0 });
        assert!(matches!(
            Segmenter::new(coords.clone(), bad_obs, 2, 1.0, &mut init, rng.clone()),
            Err(BuildError::NonFinite)
        ));

        let planar = Mat::from_fn(20, 2, |i, j| (i + j) as f64);
        assert!(matches!(
            Segmenter::new(planar, obs, 2, 1.0, &mut init, rng),
            Err(BuildError::UnsupportedDimension(2))
        ));
    }

    #[test]
    fn malformed_initializer_output_is_rejected() {
        let (coords, obs, mut init) = two_cluster_setup();
        init.init.labels[3] = 9;
        let rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            Segmenter::new(coords, obs, 2, 1.0, &mut init, rng),
            Err(BuildError::MalformedInit)
        ));
    }

    #[test]
    fn trace_grows_by_exactly_one_per_iteration() {
        let (coords, obs, mut init) = two_cluster_setup();
        let rng = ChaCha8Rng::seed_from_u64(7);
        let mut segmenter = Segmenter::new(coords, obs, 2, 1.0, &mut init, rng).unwrap();
        assert_eq!(segmenter.trace().len(), 1);
        segmenter.fit(5, &FitOptions::default()).unwrap();
        assert_eq!(segmenter.trace().len(), 6);
        for snapshot in segmenter.trace().iter() {
            assert!(snapshot.labels.iter().all(|&l| l < 2));
            assert_eq!(snapshot.means.len(), 2);
            assert_eq!(snapshot.covariances.len(), 2);
            assert_eq!(snapshot.beta.nrows(), 1);
        }
    }

    #[test]
    fn invalid_options_fail_before_sampling() {
        let (coords, obs, mut init) = two_cluster_setup();
        let rng = ChaCha8Rng::seed_from_u64(7);
        let mut segmenter = Segmenter::new(coords, obs, 2, 1.0, &mut init, rng).unwrap();
        let options = FitOptions {
            temperature: 0.0,
            ..FitOptions::default()
        };
        assert!(matches!(
            segmenter.fit(3, &options),
            Err(FitError::InvalidOptions)
        ));
        assert_eq!(segmenter.trace().len(), 1);
    }

    #[test]
    fn stop_token_ends_the_run_at_an_iteration_boundary() {
        let (coords, obs, mut init) = two_cluster_setup();
        let rng = ChaCha8Rng::seed_from_u64(7);
        let mut segmenter = Segmenter::new(coords, obs, 2, 1.0, &mut init, rng).unwrap();
        segmenter.stop_token().store(true, Ordering::Relaxed);
        segmenter.fit(10, &FitOptions::default()).unwrap();
        assert_eq!(segmenter.trace().len(), 1);
    }
}
