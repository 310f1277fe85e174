use std::cmp::Ordering;
use std::ops::RangeInclusive;

use anyhow::Result;
use faer::{Col, Mat};

/// Starting state supplied by a mixture-model collaborator: one label per
/// observation plus a mean vector and covariance matrix per label.
#[derive(Debug, Clone)]
pub struct MixtureInit {
    pub labels: Vec<usize>,
    pub means: Vec<Col<f64>>,
    pub covariances: Vec<Mat<f64>>,
}

/// Collaborator that discovers the initial clustering.
///
/// Implementations typically fit a finite Gaussian mixture to the
/// observations; the sampler only relies on the returned shapes, validated at
/// construction.
pub trait MixtureInitializer {
    fn initialize(&mut self, observations: &Mat<f64>, n_labels: usize) -> Result<MixtureInit>;

    /// Model-order criterion for a candidate label count, lower is better
    /// (an information criterion, typically). Collaborators that cannot
    /// score return `None` and label-count selection falls back to the
    /// largest candidate.
    fn score(&mut self, _observations: &Mat<f64>, _n_labels: usize) -> Option<f64> {
        None
    }
}

pub(crate) fn select_label_count<I: MixtureInitializer + ?Sized>(
    initializer: &mut I,
    observations: &Mat<f64>,
    candidates: RangeInclusive<usize>,
) -> usize {
    let fallback = *candidates.end();
    candidates
        .filter_map(|k| initializer.score(observations, k).map(|score| (k, score)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(k, _)| k)
        .unwrap_or(fallback)
}
