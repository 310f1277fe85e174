//! Bayesian spatial segmentation with hidden Markov random fields.
//!
//! Observations indexed by physical position are clustered into a fixed
//! number of labels so that neighboring sites prefer the same label. A Potts
//! energy couples the labels of neighbors, a Gaussian mixture carries the
//! data likelihood, and a Gibbs sampler with per-block Metropolis-Hastings
//! updates draws labels, means, covariances and the coupling strength beta,
//! recording every accepted state in an append-only trace.

pub(crate) mod energy;
pub(crate) mod gaussian;
pub(crate) mod graph;
pub(crate) mod init;
pub(crate) mod math;
pub(crate) mod metropolis;
pub(crate) mod priors;
pub(crate) mod proposal;
pub(crate) mod sampler;
pub(crate) mod trace;

pub use energy::{label_probability, EnergyModel};
pub use gaussian::NotPositiveDefinite;
pub use graph::{NeighborGraph, PhysicalDim};
pub use init::{MixtureInit, MixtureInitializer};
pub use priors::Priors;
pub use proposal::{propose_beta, propose_covariance, propose_covariances, propose_mean,
    propose_means, rotation_angles};
pub use sampler::{BuildError, FitError, FitOptions, Segmenter, SweepStats, Verbosity};
pub use trace::{Snapshot, Trace};
