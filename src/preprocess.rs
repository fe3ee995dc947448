//! Topography preprocessing: re-referencing and unit-norm scaling.
//!
//! Clustering compares maps by direction only, so every candidate vector is
//! scaled to unit Euclidean norm before it reaches a clusterer. Flat maps
//! (dead channel sets, zero-padded samples) have no direction and are
//! excluded rather than zeroed.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::util::{check_dimensions, norm, normalize_in_place, FLAT_TOLERANCE};
use crate::error::{Error, Result};

/// Reference applied to each topography before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reference {
    /// Use the vectors as given.
    #[default]
    None,
    /// Subtract the across-channel mean from every sample (average reference).
    Average,
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Unit-norm vectors, in input order, degenerate rows removed.
    pub vectors: Vec<Vec<f32>>,
    /// `kept[i]` is the input index of `vectors[i]`.
    pub kept: Vec<usize>,
    /// Input indices that were dropped for having zero norm.
    pub dropped: Vec<usize>,
}

/// Subtract the channel mean from each sample.
///
/// `data[t][c] -= mean(data[t][..])`. Samples that were constant across
/// channels come out exactly zero, so downstream flat checks catch them.
pub fn average_reference_inplace(data: &mut [Vec<f32>]) {
    for sample in data.iter_mut() {
        average_reference_sample(sample);
    }
}

fn average_reference_sample(sample: &mut [f32]) {
    if sample.is_empty() {
        return;
    }
    let scale = norm(sample);
    let mean = sample.iter().sum::<f32>() / sample.len() as f32;
    for v in sample.iter_mut() {
        *v -= mean;
    }
    if norm(sample) <= FLAT_TOLERANCE * scale {
        sample.fill(0.0);
    }
}

/// Re-reference (optionally) and scale one vector to unit norm.
///
/// `index` is only used to label the error.
pub fn normalize_vector(vector: &[f32], reference: Reference, index: usize) -> Result<Vec<f32>> {
    let mut v = vector.to_vec();
    if reference == Reference::Average {
        average_reference_sample(&mut v);
    }
    if normalize_in_place(&mut v) {
        Ok(v)
    } else {
        Err(Error::DegenerateVector { index })
    }
}

/// Normalize a sample matrix, dropping zero-norm rows.
///
/// Fails only on structural problems (empty input, ragged rows). Degenerate
/// rows are reported in [`Normalized::dropped`].
pub fn normalize(vectors: &[Vec<f32>], reference: Reference) -> Result<Normalized> {
    check_dimensions(vectors)?;

    let mut out = Normalized {
        vectors: Vec::with_capacity(vectors.len()),
        kept: Vec::with_capacity(vectors.len()),
        dropped: Vec::new(),
    };
    for (i, v) in vectors.iter().enumerate() {
        match normalize_vector(v, reference, i) {
            Ok(unit) => {
                out.vectors.push(unit);
                out.kept.push(i);
            }
            Err(Error::DegenerateVector { index }) => out.dropped.push(index),
            Err(e) => return Err(e),
        }
    }

    if !out.dropped.is_empty() {
        warn!(
            dropped = out.dropped.len(),
            total = vectors.len(),
            "dropping zero-norm topographies"
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sum_is_zero_after_reference() {
        let mut data: Vec<Vec<f32>> = (0..32)
            .map(|t| (0..8).map(|c| ((c * 7 + t * 3) as f32).sin()).collect())
            .collect();
        average_reference_inplace(&mut data);
        for sample in &data {
            approx::assert_abs_diff_eq!(sample.iter().sum::<f32>(), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn reference_preserves_channel_differences() {
        let mut data = vec![vec![2.0f32, 4.0]; 5];
        average_reference_inplace(&mut data);
        for sample in &data {
            approx::assert_abs_diff_eq!(sample[0] - sample[1], -2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn normalized_vectors_have_unit_norm() {
        let data = vec![vec![3.0f32, 4.0, 0.0], vec![-1.0, 1.0, 1.0]];
        let out = normalize(&data, Reference::None).unwrap();
        assert_eq!(out.kept, vec![0, 1]);
        for v in &out.vectors {
            approx::assert_abs_diff_eq!(norm(v), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn degenerate_rows_are_dropped_not_zeroed() {
        let data = vec![
            vec![1.0f32, 2.0, 3.0],
            vec![0.0, 0.0, 0.0],
            vec![5.0, 5.0, 5.0], // flat after average reference
            vec![1.0, -1.0, 0.0],
        ];
        let out = normalize(&data, Reference::Average).unwrap();
        assert_eq!(out.kept, vec![0, 3]);
        assert_eq!(out.dropped, vec![1, 2]);
        assert_eq!(out.vectors.len(), 2);
    }

    #[test]
    fn single_vector_degenerate_error() {
        let err = normalize_vector(&[0.0, 0.0], Reference::None, 7).unwrap_err();
        assert!(matches!(err, Error::DegenerateVector { index: 7 }));
    }

    #[test]
    fn average_reference_yields_zero_mean() {
        let v = normalize_vector(&[1.0, 2.0, 6.0], Reference::Average, 0).unwrap();
        approx::assert_abs_diff_eq!(v.iter().sum::<f32>(), 0.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(norm(&v), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn constant_maps_are_flat_after_reference() {
        for value in [0.7f32, 1.3, 3.1, 12.7] {
            assert!(matches!(
                normalize_vector(&[value; 8], Reference::Average, 4),
                Err(Error::DegenerateVector { index: 4 })
            ));
        }
        let mut dipole = vec![0.0f32; 8];
        dipole[0] = 1.0;
        dipole[1] = -1.0;
        let out = normalize(&[vec![3.1; 8], dipole], Reference::Average).unwrap();
        assert_eq!(out.dropped, vec![0]);
        assert_eq!(out.kept, vec![1]);
    }

    #[test]
    fn in_place_reference_zeroes_constant_samples() {
        let ramp: Vec<f32> = (1..=8).map(|c| c as f32).collect();
        let mut data = vec![vec![3.1f32; 8], vec![12.7; 8], ramp];
        average_reference_inplace(&mut data);
        assert!(data[0].iter().all(|&v| v == 0.0));
        assert!(data[1].iter().all(|&v| v == 0.0));
        approx::assert_abs_diff_eq!(data[2][0], -3.5, epsilon = 1e-6);
    }
}
