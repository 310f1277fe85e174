use faer::Mat;
use itertools::izip;

pub(crate) const LN_2PI: f64 = 1.8378770664093453;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

/// Log-density of a scalar normal distribution with the given standard deviation.
#[inline]
pub(crate) fn norm_logpdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    -0.5 * z * z - std.ln() - 0.5 * LN_2PI
}

/// Modified Gram-Schmidt over the columns of `m`, in place.
///
/// Column order is preserved, which keeps every basis vector paired with its
/// singular value after a rotation pass. Columns that cancel to zero are left
/// unnormalized rather than divided by zero.
pub(crate) fn orthonormalize_columns(m: &mut Mat<f64>) {
    let k = m.ncols();
    for j in 0..k {
        let mut col = m.col_as_slice(j).to_vec();
        for i in 0..j {
            let basis = m.col_as_slice(i);
            let proj: f64 = izip!(basis, col.iter()).map(|(b, c)| b * c).sum();
            izip!(col.iter_mut(), basis).for_each(|(c, b)| *c -= proj * b);
        }
        let norm = col.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            col.iter_mut().for_each(|v| *v /= norm);
        }
        m.col_as_slice_mut(j).copy_from_slice(&col);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logaddexp(x in -10f64..10f64, y in -10f64..10f64) {
            let a = (x.exp() + y.exp()).ln();
            let b = logaddexp(x, y);
            let neginf = f64::NEG_INFINITY;
            let nan = f64::NAN;
            prop_assert!((a - b).abs() < 1e-10);
            prop_assert_eq!(b, logaddexp(y, x));
            prop_assert_eq!(x, logaddexp(x, neginf));
            prop_assert_eq!(logaddexp(neginf, neginf), neginf);
            prop_assert!(logaddexp(nan, x).is_nan());
        }
    }

    #[test]
    fn check_neginf() {
        assert_eq!(logaddexp(f64::NEG_INFINITY, 2.), 2.);
        assert_eq!(logaddexp(2., f64::NEG_INFINITY), 2.);
    }

    #[test]
    fn norm_logpdf_standard() {
        // density of N(0, 1) at zero is 1/sqrt(2 pi)
        let expected = -(0.5f64 * LN_2PI);
        assert!((norm_logpdf(0.0, 0.0, 1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn gram_schmidt_produces_orthonormal_columns() {
        let mut m = Mat::from_fn(4, 4, |i, j| ((i * 7 + j * 3 + 1) as f64).sin() + 0.1);
        orthonormalize_columns(&mut m);
        for a in 0..4 {
            for b in 0..4 {
                let dot: f64 = izip!(m.col_as_slice(a), m.col_as_slice(b))
                    .map(|(x, y)| x * y)
                    .sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!(
                    (dot - expected).abs() < 1e-10,
                    "columns {a} and {b} not orthonormal: {dot}"
                );
            }
        }
    }
}
