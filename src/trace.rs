use faer::{Col, Mat};

/// One accepted sampler state: the labels drawn this iteration and the
/// parameter blocks that survived their acceptance tests.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Label per site, each in `[0, n_labels)`.
    pub labels: Vec<usize>,
    /// Mean vector per label.
    pub means: Vec<Col<f64>>,
    /// Covariance matrix per label, symmetric positive definite.
    pub covariances: Vec<Mat<f64>>,
    /// Spatial-coupling parameter.
    pub beta: Col<f64>,
}

/// Append-only iteration history, seeded with the initializer's output and
/// extended by exactly one snapshot per completed sweep. Never compacted,
/// never mutated after append.
#[derive(Debug, Clone)]
pub struct Trace {
    snapshots: Vec<Snapshot>,
}

impl Trace {
    pub(crate) fn new(initial: Snapshot) -> Self {
        Trace {
            snapshots: vec![initial],
        }
    }

    pub(crate) fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, iteration: usize) -> Option<&Snapshot> {
        self.snapshots.get(iteration)
    }

    pub fn last(&self) -> &Snapshot {
        self.snapshots
            .last()
            .expect("the trace holds at least the initial state")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// Site-major label assignment per iteration.
    pub fn label_history(&self) -> Vec<&[usize]> {
        self.snapshots.iter().map(|s| s.labels.as_slice()).collect()
    }

    /// Beta components per iteration.
    pub fn beta_history(&self) -> Vec<&[f64]> {
        self.snapshots.iter().map(|s| s.beta.as_slice()).collect()
    }

    /// Mean of one label over iterations, feature-major per entry.
    pub fn mean_history(&self, label: usize) -> Vec<&[f64]> {
        self.snapshots
            .iter()
            .map(|s| s.means[label].as_slice())
            .collect()
    }

    /// Covariance matrices of one label over iterations.
    pub fn covariance_history(&self, label: usize) -> Vec<&Mat<f64>> {
        self.snapshots
            .iter()
            .map(|s| &s.covariances[label])
            .collect()
    }

    /// Standard deviation of one feature under one label, per iteration.
    pub fn std_dev_trace(&self, feature: usize, label: usize) -> Vec<f64> {
        self.snapshots
            .iter()
            .map(|s| s.covariances[label].col_as_slice(feature)[feature].sqrt())
            .collect()
    }

    /// Correlation coefficient between the first two features under one
    /// label, per iteration. `None` with fewer than two features.
    pub fn correlation_trace(&self, label: usize) -> Option<Vec<f64>> {
        if self.snapshots[0].covariances[label].nrows() < 2 {
            return None;
        }
        Some(
            self.snapshots
                .iter()
                .map(|s| {
                    let cov = &s.covariances[label];
                    let off = cov.col_as_slice(1)[0];
                    off / (cov.col_as_slice(0)[0].sqrt() * cov.col_as_slice(1)[1].sqrt())
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(offset: f64) -> Snapshot {
        Snapshot {
            labels: vec![0, 1],
            means: vec![Col::from_fn(2, |f| f as f64 + offset); 2],
            covariances: vec![
                Mat::from_fn(2, 2, |i, j| if i == j { 4.0 + offset } else { 1.0 });
                2
            ],
            beta: Col::from_fn(1, |_| offset),
        }
    }

    #[test]
    fn histories_share_the_trace_length() {
        let mut trace = Trace::new(snapshot(0.0));
        trace.push(snapshot(1.0));
        trace.push(snapshot(2.0));
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.label_history().len(), 3);
        assert_eq!(trace.beta_history().len(), 3);
        assert_eq!(trace.mean_history(0).len(), 3);
        assert_eq!(trace.covariance_history(1).len(), 3);
    }

    #[test]
    fn extractors_read_the_covariance_diagonal() {
        let trace = Trace::new(snapshot(0.0));
        assert_eq!(trace.std_dev_trace(0, 0), vec![2.0]);
        let corr = trace.correlation_trace(0).unwrap();
        assert!((corr[0] - 0.25).abs() < 1e-12);
    }
}
