//! Polarity-invariant spatial correlation.
//!
//! A scalp map and its exact negation describe the same generator
//! configuration, so every comparison in this crate goes through
//! [`correlate`], which scores two maps by the absolute value of their cosine
//! and reports the sign separately. The clusterers, the backfitter, the
//! smoother and the GEV computation all share this one function.

use crate::cluster::util::{dot, norm, NORM_EPSILON};

/// Result of comparing a sample to a cluster center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    /// `|cos(a, b)|` in `[0, 1]`; `0.0` when either vector is flat.
    pub value: f32,
    /// Sign of the dot product (`1.0` or `-1.0`). Needed to sign-align members
    /// during center updates; not part of the label.
    pub sign: f32,
}

/// Absolute cosine similarity between `a` and `b`, plus the sign of `a · b`.
#[inline]
pub fn correlate(a: &[f32], b: &[f32]) -> Correlation {
    let d = dot(a, b);
    let denom = norm(a) * norm(b);
    let sign = if d < 0.0 { -1.0 } else { 1.0 };
    if !(denom > NORM_EPSILON) {
        return Correlation { value: 0.0, sign };
    }
    Correlation {
        value: (d.abs() / denom).min(1.0),
        sign,
    }
}

/// Convenience wrapper returning only the polarity-invariant score.
#[inline]
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    correlate(a, b).value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_does_not_change_value() {
        let a = [0.3f32, -1.2, 0.7, 2.0];
        let b = [1.0f32, 0.5, -0.25, 0.1];
        let neg: Vec<f32> = b.iter().map(|x| -x).collect();

        let c1 = correlate(&a, &b);
        let c2 = correlate(&a, &neg);
        assert_eq!(c1.value, c2.value);
        assert_eq!(c1.sign, -c2.sign);
    }

    #[test]
    fn identical_and_opposite_are_perfect() {
        let a = [0.5f32, 0.5, 0.5, 0.5];
        let neg = [-0.5f32, -0.5, -0.5, -0.5];
        assert_eq!(similarity(&a, &a), 1.0);
        assert_eq!(similarity(&a, &neg), 1.0);
    }

    #[test]
    fn orthogonal_is_zero() {
        assert_eq!(similarity(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
    }

    #[test]
    fn flat_vector_scores_zero() {
        let c = correlate(&[0.0, 0.0], &[1.0, 0.0]);
        assert_eq!(c.value, 0.0);
    }
}
