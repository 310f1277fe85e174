use faer::Mat;

use crate::sampler::BuildError;

/// Physical dimensionality of the coordinate system.
///
/// Only the one dimensional chain is implemented. The higher dimensional
/// variants carry their reserved spatial-coupling dimensionalities but every
/// entry point that would need them fails with
/// [`BuildError::UnsupportedDimension`] instead of silently producing empty
/// energies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalDim {
    One,
    Two,
    Three,
}

impl PhysicalDim {
    /// Dimensionality of the spatial-coupling parameter beta.
    pub fn beta_dim(self) -> usize {
        match self {
            PhysicalDim::One => 1,
            PhysicalDim::Two => 4,
            PhysicalDim::Three => 13,
        }
    }

    pub(crate) fn from_coordinate_columns(columns: usize) -> Result<Self, BuildError> {
        match columns {
            1 => Ok(PhysicalDim::One),
            2 => Ok(PhysicalDim::Two),
            3 => Ok(PhysicalDim::Three),
            other => Err(BuildError::UnsupportedDimension(other)),
        }
    }
}

/// Symmetric adjacency over sites, built once from the coordinate order.
///
/// Sites must be supplied in the physical order along which adjacency is
/// implied; building on unsorted or duplicate coordinates is undefined.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    neighbors: Vec<Vec<usize>>,
}

impl NeighborGraph {
    /// Build the neighborhood system for `coordinates` (`n_sites x d`).
    pub fn build(coordinates: &Mat<f64>) -> Result<Self, BuildError> {
        match PhysicalDim::from_coordinate_columns(coordinates.ncols())? {
            PhysicalDim::One => Self::build_chain(coordinates.nrows()),
            PhysicalDim::Two => Err(BuildError::UnsupportedDimension(2)),
            PhysicalDim::Three => Err(BuildError::UnsupportedDimension(3)),
        }
    }

    fn build_chain(n_sites: usize) -> Result<Self, BuildError> {
        if n_sites < 2 {
            return Err(BuildError::TooFewSites);
        }
        let neighbors = (0..n_sites)
            .map(|i| {
                if i == 0 {
                    vec![1]
                } else if i == n_sites - 1 {
                    vec![n_sites - 2]
                } else {
                    vec![i - 1, i + 1]
                }
            })
            .collect();
        Ok(NeighborGraph { neighbors })
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn neighbors(&self, site: usize) -> &[usize] {
        &self.neighbors[site]
    }
}
