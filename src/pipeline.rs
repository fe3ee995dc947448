//! End-to-end fitting and backfitting.
//!
//! ```text
//! candidate maps ──normalize──▶ cluster ──▶ ClusterSet
//!                                              │
//! recording ──(re-reference)──▶ backfit ──▶ smooth ──▶ GEV ──▶ Segmentation
//! ```
//!
//! [`fit`] and [`predict`] validate every parameter and shape before any
//! computation starts. Numerical trouble (flat maps, empty clusters,
//! exhausted iteration budgets) is handled inside and reported as
//! [`FitWarning`]s where the result is still usable.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backfit::Backfitter;
use crate::cluster::util::check_dimensions;
use crate::cluster::{Aahc, CancelToken, CenterFit, Clustering, ModKMeans};
use crate::error::{Error, Result};
use crate::metrics::{compute_gev, Gev};
use crate::model::{ClusterMetadata, ClusterSet};
use crate::preprocess::{average_reference_inplace, normalize, Reference};
use crate::segment::{segment_stats, segments, transition_matrix, Segment, SegmentStats, TransitionMatrix};
use crate::smooth::Smoother;

/// Clustering strategy selected at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// Modified k-means with random restarts.
    #[default]
    ModKMeans,
    /// Deterministic agglomerative clustering.
    Aahc,
}

/// Options for [`fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Iteration budget per restart (modified k-means only).
    pub max_iterations: usize,
    /// Relative GEV change under which a restart counts as converged.
    pub convergence_tolerance: f64,
    /// Independent restarts (modified k-means only).
    pub n_restarts: usize,
    /// Base seed; restart `r` uses `seed + r`. Drawn from the OS when `None`.
    pub random_seed: Option<u64>,
    /// Clustering strategy.
    pub strategy: Strategy,
    /// Reference applied to the candidate maps before normalization.
    pub reference: Reference,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            convergence_tolerance: 1e-6,
            n_restarts: 100,
            random_seed: None,
            strategy: Strategy::ModKMeans,
            reference: Reference::None,
        }
    }
}

impl FitOptions {
    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                message: "must be at least 1",
            });
        }
        if !(self.convergence_tolerance >= 0.0) || !self.convergence_tolerance.is_finite() {
            return Err(Error::InvalidParameter {
                name: "convergence_tolerance",
                message: "must be non-negative and finite",
            });
        }
        if self.n_restarts == 0 {
            return Err(Error::InvalidParameter {
                name: "n_restarts",
                message: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Non-fatal conditions encountered during a fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitWarning {
    /// The best restart used its whole iteration budget without converging.
    NonConvergence {
        /// The budget that was exhausted.
        max_iterations: usize,
    },
    /// Zero-norm candidate maps were excluded from clustering.
    DroppedVectors {
        /// Input indices of the dropped maps.
        indices: Vec<usize>,
    },
}

/// Everything produced by one [`fit`] call. Immutable; refitting creates a
/// new result.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    cluster_set: ClusterSet,
    labels: Vec<Option<usize>>,
    correlations: Vec<f32>,
    gev: Gev,
    n_iter: usize,
    warnings: Vec<FitWarning>,
}

impl FitResult {
    /// The fitted cluster centers.
    pub fn cluster_set(&self) -> &ClusterSet {
        &self.cluster_set
    }

    /// Take the cluster set, dropping the per-sample data.
    pub fn into_cluster_set(self) -> ClusterSet {
        self.cluster_set
    }

    /// Label per input map; `None` for dropped maps.
    pub fn labels(&self) -> &[Option<usize>] {
        &self.labels
    }

    /// Absolute correlation of each input map with its center (0.0 when dropped).
    pub fn correlations(&self) -> &[f32] {
        &self.correlations
    }

    /// GEV of the fitted maps.
    pub fn gev(&self) -> &Gev {
        &self.gev
    }

    /// Iterations (modified k-means) or merges (AAHC) of the winning run.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Whether the winning run met the convergence criterion.
    pub fn converged(&self) -> bool {
        self.cluster_set.metadata().converged
    }

    /// Non-fatal conditions met while fitting.
    pub fn warnings(&self) -> &[FitWarning] {
        &self.warnings
    }
}

/// Fit `k` microstate maps to candidate topographies (typically GFP peaks).
///
/// `vectors` is samples × channels. Maps are re-referenced per
/// [`FitOptions::reference`], scaled to unit norm, and flat maps are dropped
/// (reported in [`FitResult::warnings`]).
///
/// # Errors
///
/// * [`Error::InvalidClusterCount`] if `k == 0` or `k` exceeds the number of
///   usable maps.
/// * [`Error::InvalidParameter`] / [`Error::DimensionMismatch`] for bad
///   options or ragged input.
/// * [`Error::EmptyCluster`] if the maps have fewer than `k` distinct
///   directions.
pub fn fit(vectors: &[Vec<f32>], k: usize, options: &FitOptions) -> Result<FitResult> {
    fit_inner(vectors, k, options, None)
}

/// [`fit`], abortable through `cancel` between restarts, iterations, or merges.
pub fn fit_cancellable(
    vectors: &[Vec<f32>],
    k: usize,
    options: &FitOptions,
    cancel: &CancelToken,
) -> Result<FitResult> {
    fit_inner(vectors, k, options, Some(cancel))
}

fn fit_inner(
    vectors: &[Vec<f32>],
    k: usize,
    options: &FitOptions,
    cancel: Option<&CancelToken>,
) -> Result<FitResult> {
    options.validate()?;
    let n_channels = check_dimensions(vectors)?;
    if k == 0 || k > vectors.len() {
        return Err(Error::InvalidClusterCount {
            requested: k,
            n_items: vectors.len(),
        });
    }

    let normalized = normalize(vectors, options.reference)?;
    if normalized.vectors.len() < k {
        return Err(Error::InvalidClusterCount {
            requested: k,
            n_items: normalized.vectors.len(),
        });
    }

    let center_fit: CenterFit = match options.strategy {
        Strategy::ModKMeans => {
            let mut model = ModKMeans::new(k)
                .with_max_iter(options.max_iterations)
                .with_tol(options.convergence_tolerance)
                .with_n_init(options.n_restarts);
            if let Some(seed) = options.random_seed {
                model = model.with_seed(seed);
            }
            if let Some(token) = cancel {
                model = model.with_cancel(token.clone());
            }
            model.fit_centers(&normalized.vectors)?
        }
        Strategy::Aahc => {
            let mut model = Aahc::new(k);
            if let Some(token) = cancel {
                model = model.with_cancel(token.clone());
            }
            model.fit_centers(&normalized.vectors)?
        }
    };

    let mut warnings = Vec::new();
    if !normalized.dropped.is_empty() {
        warnings.push(FitWarning::DroppedVectors {
            indices: normalized.dropped.clone(),
        });
    }
    if !center_fit.converged {
        warn!(
            max_iterations = options.max_iterations,
            gev = center_fit.gev,
            "fit did not converge within its iteration budget"
        );
        warnings.push(FitWarning::NonConvergence {
            max_iterations: options.max_iterations,
        });
    }

    let assignment = Backfitter::new(&center_fit.centers)?.assign(&normalized.vectors)?;
    let gev = compute_gev(&assignment.labels, &assignment.correlations, &assignment.norms, k)?;

    let mut labels = vec![None; vectors.len()];
    let mut correlations = vec![0.0f32; vectors.len()];
    for (row, &input_idx) in normalized.kept.iter().enumerate() {
        labels[input_idx] = assignment.labels[row];
        correlations[input_idx] = assignment.correlations[row];
    }

    info!(
        strategy = ?options.strategy,
        k,
        n_vectors = normalized.vectors.len(),
        gev = gev.total,
        n_iter = center_fit.n_iter,
        converged = center_fit.converged,
        "microstate fit finished"
    );

    let metadata = ClusterMetadata {
        n_channels,
        options: options.clone(),
        gev: Some(gev.total),
        converged: center_fit.converged,
        seed: center_fit.seed,
    };

    Ok(FitResult {
        cluster_set: ClusterSet::new(center_fit.centers, metadata),
        labels,
        correlations,
        gev,
        n_iter: center_fit.n_iter,
        warnings,
    })
}

/// Minimum segment length, in samples or in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentLength {
    /// A sample count.
    Samples(usize),
    /// A duration; converted with the recording's sampling rate.
    Seconds(f32),
}

impl Default for SegmentLength {
    fn default() -> Self {
        SegmentLength::Samples(0)
    }
}

impl SegmentLength {
    /// Resolve to a sample count (`round(seconds * sfreq)`).
    pub fn to_samples(self, sfreq: Option<f32>) -> Result<usize> {
        match self {
            SegmentLength::Samples(n) => Ok(n),
            SegmentLength::Seconds(s) => {
                if !(s >= 0.0) || !s.is_finite() {
                    return Err(Error::InvalidParameter {
                        name: "min_segment_length",
                        message: "must be non-negative and finite",
                    });
                }
                let sfreq = checked_sfreq(sfreq)?.ok_or(Error::InvalidParameter {
                    name: "sfreq",
                    message: "required when min_segment_length is given in seconds",
                })?;
                Ok((f64::from(s) * f64::from(sfreq)).round() as usize)
            }
        }
    }
}

fn checked_sfreq(sfreq: Option<f32>) -> Result<Option<f32>> {
    match sfreq {
        Some(f) if !(f > 0.0) || !f.is_finite() => Err(Error::InvalidParameter {
            name: "sfreq",
            message: "must be positive and finite",
        }),
        other => Ok(other),
    }
}

/// Options for [`predict`].
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOptions {
    /// Samples whose best correlation is below this stay unlabeled. Applied at
    /// backfit time only; samples reassigned by smoothing keep their new label.
    pub min_correlation: f32,
    /// Labeled runs shorter than this are reassigned.
    pub min_segment_length: SegmentLength,
    /// Sampling rate in Hz; needed for time-based lengths and segment statistics.
    pub sfreq: Option<f32>,
    /// Half-width of the majority-vote window (0 disables it).
    pub half_window: usize,
    /// Unlabel the first and last segments.
    pub reject_edges: bool,
    /// Upper bound on short-segment rejection passes.
    pub max_smoothing_passes: usize,
    /// Reference for the recording; `None` reuses the cluster set's fit reference.
    pub reference: Option<Reference>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            min_correlation: 0.0,
            min_segment_length: SegmentLength::default(),
            sfreq: None,
            half_window: 0,
            reject_edges: false,
            max_smoothing_passes: 1000,
            reference: None,
        }
    }
}

/// A backfitted, smoothed recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    labels: Vec<Option<usize>>,
    correlations: Vec<f32>,
    gev: Gev,
    k: usize,
    sfreq: Option<f32>,
}

impl Segmentation {
    /// Label per sample; `None` where unlabeled.
    pub fn labels(&self) -> &[Option<usize>] {
        &self.labels
    }

    /// Absolute correlation of each sample with its assigned center.
    pub fn correlations(&self) -> &[f32] {
        &self.correlations
    }

    /// GEV of the recording under the final labels.
    pub fn gev(&self) -> &Gev {
        &self.gev
    }

    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Sampling rate, if one was supplied.
    pub fn sfreq(&self) -> Option<f32> {
        self.sfreq
    }

    /// Maximal runs of identical labels.
    pub fn segments(&self) -> Vec<Segment> {
        segments(&self.labels)
    }

    /// Per-cluster temporal parameters. Requires a sampling rate.
    pub fn stats(&self) -> Result<Vec<SegmentStats>> {
        let sfreq = self.sfreq.ok_or(Error::InvalidParameter {
            name: "sfreq",
            message: "required for segment statistics",
        })?;
        segment_stats(&self.labels, self.k, f64::from(sfreq))
    }

    /// Transitions between consecutive labeled segments.
    pub fn transition_matrix(&self, skip_unlabeled: bool) -> Result<TransitionMatrix> {
        transition_matrix(&self.labels, self.k, skip_unlabeled)
    }
}

/// Backfit `cluster_set` onto a full recording, smooth, and score it.
///
/// `signal` is samples × channels and must have the cluster set's channel count.
pub fn predict(
    cluster_set: &ClusterSet,
    signal: &[Vec<f32>],
    options: &PredictOptions,
) -> Result<Segmentation> {
    predict_inner(cluster_set, signal, None, options)
}

/// [`predict`], with samples flagged in `rejected` (e.g. artifacts) left
/// unlabeled.
pub fn predict_masked(
    cluster_set: &ClusterSet,
    signal: &[Vec<f32>],
    rejected: &[bool],
    options: &PredictOptions,
) -> Result<Segmentation> {
    predict_inner(cluster_set, signal, Some(rejected), options)
}

fn predict_inner(
    cluster_set: &ClusterSet,
    signal: &[Vec<f32>],
    rejected: Option<&[bool]>,
    options: &PredictOptions,
) -> Result<Segmentation> {
    let sfreq = checked_sfreq(options.sfreq)?;
    let min_len = options.min_segment_length.to_samples(sfreq)?;
    if !(0.0..=1.0).contains(&options.min_correlation) {
        return Err(Error::InvalidParameter {
            name: "min_correlation",
            message: "must be in [0, 1]",
        });
    }
    let found = check_dimensions(signal)?;
    if found != cluster_set.n_channels() {
        return Err(Error::DimensionMismatch {
            expected: cluster_set.n_channels(),
            found,
        });
    }

    let reference = options
        .reference
        .unwrap_or(cluster_set.metadata().options.reference);
    let referenced;
    let signal = match reference {
        Reference::None => signal,
        Reference::Average => {
            let mut copy = signal.to_vec();
            average_reference_inplace(&mut copy);
            referenced = copy;
            &referenced[..]
        }
    };

    let centers = cluster_set.centers();
    let fitter = Backfitter::new(centers)?.with_min_correlation(options.min_correlation);
    let raw = match rejected {
        Some(mask) => fitter.assign_masked(signal, mask)?,
        None => fitter.assign(signal)?,
    };

    let smoothed = Smoother::new(min_len)
        .with_half_window(options.half_window)
        .with_reject_edges(options.reject_edges)
        .with_max_passes(options.max_smoothing_passes)
        .smooth(&raw, centers, signal)?;

    let k = cluster_set.k();
    let gev = compute_gev(&smoothed.labels, &smoothed.correlations, &smoothed.norms, k)?;

    info!(
        n_samples = signal.len(),
        k,
        min_segment_length = min_len,
        gev = gev.total,
        "backfit finished"
    );

    Ok(Segmentation {
        labels: smoothed.labels,
        correlations: smoothed.correlations,
        gev,
        k,
        sfreq,
    })
}
