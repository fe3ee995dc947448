//! EEG microstate analysis.
//!
//! `microstates` segments multichannel EEG into a small number of
//! quasi-stable scalp topographies. Maps and their negations are treated as
//! the same state throughout.
//!
//! The main entry points:
//! - [`fit`]: cluster candidate topographies (usually GFP peaks) into `k`
//!   unit-norm centers with modified k-means or AAHC.
//! - [`predict`]: backfit a [`ClusterSet`] onto a full recording, smooth
//!   the label sequence, and report GEV and segment statistics.
//! - [`ClusterSet::save`] / [`ClusterSet::load`]: persist fitted centers.
//!
//! ```rust
//! use microstates::{fit, predict, FitOptions, PredictOptions, SegmentLength};
//!
//! let maps = vec![
//!     vec![1.0, 0.0, 0.0],
//!     vec![-0.9, -0.1, 0.0],
//!     vec![0.0, 0.1, 1.0],
//!     vec![0.0, 0.0, -1.0],
//! ];
//! let opts = FitOptions { random_seed: Some(0), n_restarts: 10, ..FitOptions::default() };
//! let result = fit(&maps, 2, &opts).unwrap();
//! assert!(result.gev().total > 0.95);
//!
//! let seg = predict(
//!     result.cluster_set(),
//!     &maps,
//!     &PredictOptions { min_segment_length: SegmentLength::Samples(1), ..Default::default() },
//! )
//! .unwrap();
//! assert_eq!(seg.labels()[0], seg.labels()[1]);
//! ```
//!
//! The crate logs through `tracing` and never installs a subscriber.

#![forbid(unsafe_code)]

pub mod backfit;
pub mod cluster;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod resample;
pub mod segment;
pub mod similarity;
pub mod smooth;

pub use backfit::{Assignment, Backfitter, TIE_TOLERANCE};
pub use cluster::{Aahc, CancelToken, CenterFit, Clustering, ModKMeans};
pub use error::{Error, Result};
pub use metrics::{compute_gev, Gev};
pub use model::{ClusterMetadata, ClusterSet};
pub use pipeline::{
    fit, fit_cancellable, predict, predict_masked, FitOptions, FitResult, FitWarning,
    PredictOptions, SegmentLength, Segmentation, Strategy,
};
pub use preprocess::{normalize, normalize_vector, Reference};
pub use resample::{resample, ResampleOptions};
pub use segment::{Segment, SegmentStats, TransitionMatrix};
pub use similarity::{correlate, Correlation};
pub use smooth::Smoother;
