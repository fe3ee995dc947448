//! Global explained variance (GEV).
//!
//! For a sample `x_t` with norm `‖x_t‖` and best correlation `r_t`, the part
//! of its energy explained by its assigned center is `(‖x_t‖ · r_t)²`. GEV of
//! cluster `k` is the sum of that quantity over the samples labeled `k`,
//! divided by the summed energy `Σ ‖x_t‖²` of every labeled sample:
//!
//! ```text
//! GEV_k = Σ_{t : label_t = k} (‖x_t‖ r_t)²  /  Σ_{t : label_t ≠ None} ‖x_t‖²
//! ```
//!
//! For unit-norm inputs this reduces to the mean squared correlation. With
//! average-referenced data `‖x_t‖` is proportional to the global field power,
//! so this is the usual GFP-weighted definition.

use crate::error::{Error, Result};

/// GEV per cluster and in total.
#[derive(Debug, Clone, PartialEq)]
pub struct Gev {
    /// `per_cluster[k]` is the GEV of cluster `k`.
    pub per_cluster: Vec<f64>,
    /// Sum of `per_cluster`, accumulated in index order.
    pub total: f64,
}

impl Gev {
    /// A zero GEV for `k` clusters.
    pub fn zero(k: usize) -> Self {
        Self {
            per_cluster: vec![0.0; k],
            total: 0.0,
        }
    }
}

/// Compute per-cluster and total GEV from a labeling.
///
/// `labels`, `correlations` and `norms` are parallel per-sample slices.
/// Unlabeled samples (`None`) contribute to neither numerator nor denominator.
pub fn compute_gev(
    labels: &[Option<usize>],
    correlations: &[f32],
    norms: &[f32],
    k: usize,
) -> Result<Gev> {
    if labels.len() != correlations.len() || labels.len() != norms.len() {
        return Err(Error::InvalidParameter {
            name: "correlations",
            message: "labels, correlations and norms must have equal length",
        });
    }
    if k == 0 {
        return Err(Error::InvalidClusterCount {
            requested: 0,
            n_items: labels.len(),
        });
    }

    let mut numer = vec![0.0f64; k];
    let mut denom = 0.0f64;
    for ((label, &r), &w) in labels.iter().zip(correlations).zip(norms) {
        let Some(label) = *label else { continue };
        if label >= k {
            return Err(Error::InvalidParameter {
                name: "labels",
                message: "label out of range for cluster count",
            });
        }
        let energy = f64::from(w) * f64::from(w);
        let r = f64::from(r);
        denom += energy;
        numer[label] += energy * r * r;
    }

    if denom <= 0.0 {
        return Ok(Gev::zero(k));
    }

    let per_cluster: Vec<f64> = numer.into_iter().map(|v| v / denom).collect();
    let total = per_cluster.iter().sum();
    Ok(Gev { per_cluster, total })
}
