use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backfit::best_match;
use crate::error::Result;

/// Cluster centers produced by one clustering run, before they are frozen into
/// a [`ClusterSet`](crate::ClusterSet).
#[derive(Debug, Clone, PartialEq)]
pub struct CenterFit {
    /// `k` unit-norm centers.
    pub centers: Vec<Vec<f32>>,
    /// GEV of the fitted data under `centers`.
    pub gev: f64,
    /// Iterations (modified k-means) or merges (AAHC) performed.
    pub n_iter: usize,
    /// Whether the convergence criterion was met within the iteration budget.
    pub converged: bool,
    /// Seed of the winning restart, if the strategy is randomized.
    pub seed: Option<u64>,
}

/// Common interface for polarity-invariant clustering strategies.
///
/// Input rows are expected to be unit norm (see
/// [`preprocess::normalize`](crate::preprocess::normalize)).
pub trait Clustering {
    /// Fit `k` cluster centers to `data`.
    fn fit_centers(&self, data: &[Vec<f32>]) -> Result<CenterFit>;

    /// The configured number of clusters.
    fn n_clusters(&self) -> usize;

    /// Fit, then return the best-matching center index per input row.
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>> {
        let fit = self.fit_centers(data)?;
        Ok(data.iter().map(|x| best_match(&fit.centers, x).0).collect())
    }
}

/// Shared flag used to abort a fit between restarts or iterations.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
