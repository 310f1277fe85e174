use faer::{Col, Mat};
use itertools::izip;
use rayon::prelude::*;

use crate::gaussian::{NotPositiveDefinite, Precision};
use crate::graph::NeighborGraph;

/// Energy bookkeeping for one segmentation problem: the observations, the
/// neighborhood system and the label count it was built for.
#[derive(Debug, Clone)]
pub struct EnergyModel {
    observations: Vec<Col<f64>>,
    graph: NeighborGraph,
    n_labels: usize,
}

impl EnergyModel {
    /// `observations` is `n_sites x n_feat`, row order matching the graph.
    pub fn new(observations: &Mat<f64>, graph: NeighborGraph, n_labels: usize) -> Self {
        assert!(graph.len() == observations.nrows());
        assert!(n_labels > 0);
        let n_feat = observations.ncols();
        let observations = (0..observations.nrows())
            .map(|x| Col::from_fn(n_feat, |f| observations.col_as_slice(f)[x]))
            .collect();
        EnergyModel {
            observations,
            graph,
            n_labels,
        }
    }

    pub fn n_sites(&self) -> usize {
        self.observations.len()
    }

    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    pub(crate) fn observations(&self) -> &[Col<f64>] {
        &self.observations
    }

    /// Data term of the energy: for every site and label,
    /// `0.5 (x - mu)^T S^-1 (x - mu) + 0.5 ln det S`. The normalizing
    /// constant of the Gaussian is omitted.
    pub fn likelihood_energy(
        &self,
        means: &[Col<f64>],
        covariances: &[Mat<f64>],
    ) -> Result<Mat<f64>, NotPositiveDefinite> {
        let precisions = covariances
            .iter()
            .map(Precision::from_covariance)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.likelihood_energy_with(means, &precisions))
    }

    pub(crate) fn likelihood_energy_with(
        &self,
        means: &[Col<f64>],
        precisions: &[Precision],
    ) -> Mat<f64> {
        // Pure per-site evaluation; row order is preserved by collect.
        let rows: Vec<Vec<f64>> = self
            .observations
            .par_iter()
            .map(|x| {
                izip!(means, precisions)
                    .map(|(mean, prec)| {
                        let diff: Vec<f64> = izip!(x.as_slice(), mean.as_slice())
                            .map(|(a, b)| a - b)
                            .collect();
                        0.5 * prec.quad_form(&diff) + 0.5 * prec.log_det()
                    })
                    .collect()
            })
            .collect();
        Mat::from_fn(self.n_sites(), self.n_labels, |x, l| rows[x][l])
    }

    /// Potts disagreement penalty: every neighbor with a different label than
    /// the candidate contributes `beta`.
    pub fn gibbs_energy(&self, labels: &[usize], beta: &Col<f64>) -> Mat<f64> {
        assert!(labels.len() == self.n_sites());
        let b = beta.as_slice()[0];
        let mut energy: Mat<f64> = Mat::zeros(self.n_sites(), self.n_labels);
        for l in 0..self.n_labels {
            let col = energy.col_as_slice_mut(l);
            for (x, entry) in col.iter_mut().enumerate() {
                for &neighbor in self.graph.neighbors(x) {
                    if labels[neighbor] != l {
                        *entry += b;
                    }
                }
            }
        }
        energy
    }

    /// Reserved for pinning labels to sites; always zero.
    pub fn self_energy(&self) -> Mat<f64> {
        Mat::zeros(self.n_sites(), self.n_labels)
    }
}

pub(crate) fn add_in_place(dst: &mut Mat<f64>, src: &Mat<f64>) {
    assert!(dst.nrows() == src.nrows());
    assert!(dst.ncols() == src.ncols());
    for l in 0..dst.ncols() {
        izip!(dst.col_as_slice_mut(l).iter_mut(), src.col_as_slice(l))
            .for_each(|(d, s)| *d += s);
    }
}

/// Row-wise softmax of `-energy / temperature`.
///
/// Each row's maximum is subtracted before exponentiating so that large
/// energies cannot overflow to infinity and poison the normalization.
pub fn label_probability(energy: &Mat<f64>, temperature: f64) -> Mat<f64> {
    let n = energy.nrows();
    let k = energy.ncols();
    let mut max = vec![f64::NEG_INFINITY; n];
    for l in 0..k {
        for (x, &e) in energy.col_as_slice(l).iter().enumerate() {
            let v = -e / temperature;
            if v > max[x] {
                max[x] = v;
            }
        }
    }
    let mut denom = vec![0f64; n];
    for l in 0..k {
        for (x, &e) in energy.col_as_slice(l).iter().enumerate() {
            denom[x] += (-e / temperature - max[x]).exp();
        }
    }
    Mat::from_fn(n, k, |x, l| {
        (-energy.col_as_slice(l)[x] / temperature - max[x]).exp() / denom[x]
    })
}
