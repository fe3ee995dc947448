//! Backfitting: label every sample of a recording with its best cluster center.
//!
//! No retraining happens here. Each sample is compared to every center with
//! [`correlate`]; the label is the arg-max and the correlation is the max
//! itself. Samples whose best correlation stays under `min_correlation`, flat
//! samples, and samples flagged by the caller are left unlabeled (`None`).

use crate::cluster::util::{check_dimensions, norm, NORM_EPSILON};
use crate::error::{Error, Result};
use crate::similarity::{correlate, Correlation};

/// Two correlations closer than this are considered tied; the lower cluster
/// index wins.
pub const TIE_TOLERANCE: f32 = 1e-6;

/// Per-sample output of a backfit.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Cluster index per sample, `None` when unlabeled.
    pub labels: Vec<Option<usize>>,
    /// Best absolute correlation per sample (0.0 for flat or flagged samples).
    pub correlations: Vec<f32>,
    /// Euclidean norm of each sample, used as the GEV weight.
    pub norms: Vec<f32>,
}

impl Assignment {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the assignment covers no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Best-matching center for `x`, lowest index on ties.
///
/// `centers` must be non-empty.
pub(crate) fn best_match(centers: &[Vec<f32>], x: &[f32]) -> (usize, Correlation) {
    let mut best_idx = 0;
    let mut best = correlate(&centers[0], x);
    for (j, c) in centers.iter().enumerate().skip(1) {
        let corr = correlate(c, x);
        if corr.value > best.value + TIE_TOLERANCE {
            best_idx = j;
            best = corr;
        }
    }
    (best_idx, best)
}

/// Assigns samples to a fixed set of cluster centers.
#[derive(Debug, Clone)]
pub struct Backfitter<'a> {
    centers: &'a [Vec<f32>],
    min_correlation: f32,
}

impl<'a> Backfitter<'a> {
    /// Create a backfitter over `centers`.
    ///
    /// Centers need not be unit norm; correlation is scale-free.
    pub fn new(centers: &'a [Vec<f32>]) -> Result<Self> {
        check_dimensions(centers)?;
        Ok(Self {
            centers,
            min_correlation: 0.0,
        })
    }

    /// Samples whose best correlation is below this stay unlabeled.
    pub fn with_min_correlation(mut self, min_correlation: f32) -> Self {
        self.min_correlation = min_correlation;
        self
    }

    /// Number of channels the centers expect.
    pub fn n_channels(&self) -> usize {
        self.centers[0].len()
    }

    /// Label every sample in `signal`.
    pub fn assign(&self, signal: &[Vec<f32>]) -> Result<Assignment> {
        self.assign_inner(signal, None)
    }

    /// Like [`assign`](Self::assign), but samples with `rejected[t] == true`
    /// are left unlabeled regardless of their correlation.
    pub fn assign_masked(&self, signal: &[Vec<f32>], rejected: &[bool]) -> Result<Assignment> {
        if rejected.len() != signal.len() {
            return Err(Error::InvalidParameter {
                name: "rejected",
                message: "mask length must equal the number of samples",
            });
        }
        self.assign_inner(signal, Some(rejected))
    }

    fn assign_inner(&self, signal: &[Vec<f32>], rejected: Option<&[bool]>) -> Result<Assignment> {
        if !(0.0..=1.0).contains(&self.min_correlation) {
            return Err(Error::InvalidParameter {
                name: "min_correlation",
                message: "must be in [0, 1]",
            });
        }
        let d = check_dimensions(signal)?;
        if d != self.n_channels() {
            return Err(Error::DimensionMismatch {
                expected: self.n_channels(),
                found: d,
            });
        }

        let n = signal.len();
        let mut out = Assignment {
            labels: Vec::with_capacity(n),
            correlations: Vec::with_capacity(n),
            norms: Vec::with_capacity(n),
        };

        for (t, x) in signal.iter().enumerate() {
            let x_norm = norm(x);
            out.norms.push(x_norm);

            let flagged = rejected.is_some_and(|mask| mask[t]);
            if flagged || x_norm <= NORM_EPSILON {
                out.labels.push(None);
                out.correlations.push(0.0);
                continue;
            }

            let (idx, corr) = best_match(self.centers, x);
            out.correlations.push(corr.value);
            if corr.value < self.min_correlation {
                out.labels.push(None);
            } else {
                out.labels.push(Some(idx));
            }
        }

        Ok(out)
    }
}
