use faer::{Col, Mat, Side};
use itertools::{izip, Itertools};
use rand::Rng;
use rand_distr::Normal;

use crate::gaussian::NotPositiveDefinite;
use crate::math::orthonormalize_columns;

fn step_distribution(variance: f64) -> Normal<f64> {
    Normal::new(0.0, variance.sqrt()).expect("jump lengths are validated before sampling")
}

/// Random-walk proposal for beta: each component perturbed independently
/// with variance `jump_length`.
pub fn propose_beta<R: Rng + ?Sized>(prev: &Col<f64>, jump_length: f64, rng: &mut R) -> Col<f64> {
    let step = step_distribution(jump_length);
    let values: Vec<f64> = prev
        .as_slice()
        .iter()
        .map(|&b| b + rng.sample(step))
        .collect();
    Col::from_fn(values.len(), |i| values[i])
}

/// Random-walk proposal for one label's mean vector.
pub fn propose_mean<R: Rng + ?Sized>(prev: &Col<f64>, jump_length: f64, rng: &mut R) -> Col<f64> {
    let step = step_distribution(jump_length);
    let values: Vec<f64> = prev
        .as_slice()
        .iter()
        .map(|&m| m + rng.sample(step))
        .collect();
    Col::from_fn(values.len(), |i| values[i])
}

pub fn propose_means<R: Rng + ?Sized>(
    prev: &[Col<f64>],
    jump_length: f64,
    rng: &mut R,
) -> Vec<Col<f64>> {
    prev.iter()
        .map(|mean| propose_mean(mean, jump_length, rng))
        .collect()
}

/// One rotation angle per unordered pair of feature axes, drawn from
/// `N(0, rotation_jump)`.
pub fn rotation_angles<R: Rng + ?Sized>(
    n_feat: usize,
    rotation_jump: f64,
    rng: &mut R,
) -> Vec<f64> {
    let step = step_distribution(rotation_jump);
    let n_pairs = n_feat * n_feat.saturating_sub(1) / 2;
    (0..n_pairs).map(|_| rng.sample(step)).collect()
}

/// Rotation in the plane spanned by `x` and `y`, lifted to full dimension.
///
/// `x` and `y` are projected onto an orthonormal basis `(u, v)` of their
/// span; the returned matrix is the identity outside that plane. If the pair
/// is numerically collinear there is no plane to rotate in and the identity
/// is returned.
fn plane_rotation(x: &[f64], y: &[f64], theta: f64) -> Mat<f64> {
    let n = x.len();
    let identity = |r: usize, c: usize| if r == c { 1.0 } else { 0.0 };

    let norm_x = x.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_x <= f64::EPSILON {
        return Mat::from_fn(n, n, identity);
    }
    let u: Vec<f64> = x.iter().map(|v| v / norm_x).collect();
    let proj: f64 = izip!(u.iter(), y.iter()).map(|(a, b)| a * b).sum();
    let mut v: Vec<f64> = izip!(y.iter(), u.iter()).map(|(b, a)| b - proj * a).collect();
    let norm_v = v.iter().map(|w| w * w).sum::<f64>().sqrt();
    if norm_v <= f64::EPSILON {
        return Mat::from_fn(n, n, identity);
    }
    v.iter_mut().for_each(|w| *w /= norm_v);

    let (sin, cos) = theta.sin_cos();
    Mat::from_fn(n, n, |r, c| {
        identity(r, c) - u[r] * u[c] - v[r] * v[c]
            + u[r] * (cos * u[c] - sin * v[c])
            + v[r] * (sin * u[c] + cos * v[c])
    })
}

/// Perturb one label's covariance matrix.
///
/// The previous matrix is decomposed into an orthonormal basis and positive
/// scales; the log-scales get additive noise with variance `scale_jump`, the
/// basis is rotated by one plane rotation per feature-axis pair (`angles`),
/// re-orthonormalized, and the matrix rebuilt as `V' D' V'^T`. The result is
/// symmetric positive definite by construction; with every jump at zero the
/// input is reproduced within floating tolerance.
pub fn propose_covariance<R: Rng + ?Sized>(
    prev: &Mat<f64>,
    scale_jump: f64,
    angles: &[f64],
    rng: &mut R,
) -> Result<Mat<f64>, NotPositiveDefinite> {
    let n = prev.nrows();
    let evd = prev.selfadjoint_eigendecomposition(Side::Lower);
    let basis = evd.u().to_owned();
    let scales = evd.s().column_vector().to_owned();

    let step = step_distribution(scale_jump);
    let mut new_scales = Vec::with_capacity(n);
    for &d in scales.as_slice() {
        if !d.is_finite() || d <= 0.0 {
            return Err(NotPositiveDefinite);
        }
        new_scales.push((d.ln() + rng.sample(step)).exp());
    }

    let mut rotation = Mat::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 });
    for ((i, j), &theta) in (0..n).tuple_combinations::<(_, _)>().zip(angles) {
        let plane = plane_rotation(basis.col_as_slice(i), basis.col_as_slice(j), theta);
        rotation = &plane * &rotation;
    }

    let mut rotated = &rotation * &basis;
    orthonormalize_columns(&mut rotated);

    // V' D' V'^T, symmetric by the summation formula itself
    let cov = Mat::from_fn(n, n, |r, c| {
        (0..n)
            .map(|k| new_scales[k] * rotated.col_as_slice(k)[r] * rotated.col_as_slice(k)[c])
            .sum::<f64>()
    });
    for j in 0..n {
        if cov.col_as_slice(j).iter().any(|v| !v.is_finite()) {
            return Err(NotPositiveDefinite);
        }
    }
    Ok(cov)
}

/// Covariance proposals for every label. The rotation angles are drawn once
/// and shared across labels; the log-scale noise is independent per label.
/// A label whose reconstruction fails carries its error so that only that
/// block is rejected.
pub fn propose_covariances<R: Rng + ?Sized>(
    prev: &[Mat<f64>],
    scale_jump: f64,
    rotation_jump: f64,
    rng: &mut R,
) -> Vec<Result<Mat<f64>, NotPositiveDefinite>> {
    let n_feat = prev.first().map_or(0, |m| m.nrows());
    let angles = rotation_angles(n_feat, rotation_jump, rng);
    prev.iter()
        .map(|cov| propose_covariance(cov, scale_jump, &angles, rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Side;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn spd_fixture() -> Mat<f64> {
        // diag(3, 1, 0.5) rotated is overkill; a correlated SPD matrix will do
        Mat::from_fn(3, 3, |i, j| {
            if i == j {
                2.0 + i as f64
            } else {
                0.4
            }
        })
    }

    fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
        let mut max = 0f64;
        for j in 0..a.ncols() {
            for (x, y) in izip!(a.col_as_slice(j), b.col_as_slice(j)) {
                max = max.max((x - y).abs());
            }
        }
        max
    }

    #[test]
    fn zero_jumps_are_the_identity_transform() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let prev = spd_fixture();
        let angles = vec![0.0; 3];
        let prop = propose_covariance(&prev, 0.0, &angles, &mut rng).unwrap();
        assert!(max_abs_diff(&prev, &prop) < 1e-10);
    }

    #[test]
    fn proposals_stay_symmetric_positive_definite() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut cov = spd_fixture();
        for _ in 0..50 {
            let angles = rotation_angles(3, 0.05, &mut rng);
            cov = propose_covariance(&cov, 0.05, &angles, &mut rng).unwrap();
            for i in 0..3 {
                for j in 0..3 {
                    let diff = cov.col_as_slice(j)[i] - cov.col_as_slice(i)[j];
                    assert!(diff.abs() < 1e-9);
                }
            }
            let evd = cov.selfadjoint_eigendecomposition(Side::Lower);
            for &v in evd.s().column_vector().to_owned().as_slice() {
                assert!(v > 0.0, "eigenvalue {v} not positive");
            }
        }
    }

    #[test]
    fn plane_rotation_is_orthonormal() {
        let x = [1.0, 0.2, -0.3];
        let y = [0.1, 1.0, 0.5];
        let rot = plane_rotation(&x, &y, 0.7);
        let product = rot.transpose() * &rot;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product.col_as_slice(j)[i] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn angle_count_matches_axis_pairs() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert_eq!(rotation_angles(1, 0.1, &mut rng).len(), 0);
        assert_eq!(rotation_angles(2, 0.1, &mut rng).len(), 1);
        assert_eq!(rotation_angles(4, 0.1, &mut rng).len(), 6);
    }

    #[test]
    fn beta_proposal_moves_every_component() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let prev = Col::from_fn(1, |_| 1.0);
        let prop = propose_beta(&prev, 4.0, &mut rng);
        assert_eq!(prop.nrows(), 1);
        assert!(prop.as_slice()[0].is_finite());
        let frozen = propose_beta(&prev, 0.0, &mut rng);
        assert_eq!(frozen.as_slice()[0], 1.0);
    }
}
