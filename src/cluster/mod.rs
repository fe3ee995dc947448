//! Polarity-invariant clustering of topography vectors.
//!
//! A topography and its negation describe the same brain state, so every
//! algorithm here scores a row against a center by the absolute cosine
//! similarity and lets each row join a cluster with whichever sign fits.
//!
//! ## Objective
//!
//! Both strategies maximize the explained variance of unit-norm centers:
//!
//! ```text
//! EV = Σ_k Σ_{x ∈ C_k} (x · c_k)²      with ‖c_k‖ = 1
//! ```
//!
//! The center maximizing EV for a fixed cluster is its leading eigenvector,
//! which the sign-aligned mean approximates closely for tight clusters.
//!
//! ## Algorithms
//!
//! ### Modified k-means
//!
//! Random initialization from distinct rows, then alternate assignment and
//! sign-aligned mean updates until the GEV stops improving. Restarted from
//! several seeds; the best restart wins. Enable the `parallel` feature to
//! run restarts on the rayon pool.
//!
//! ### AAHC
//!
//! Atomize-and-agglomerate hierarchical clustering: start from singletons
//! and repeatedly merge the pair whose union loses the least explained
//! variance. Deterministic, quadratic in the number of rows.
//!
//! ## Usage
//!
//! ```rust
//! use microstates::cluster::{Aahc, Clustering, ModKMeans};
//!
//! let data = vec![
//!     vec![1.0, 0.1, 0.0],
//!     vec![-1.0, -0.1, 0.0],
//!     vec![0.0, 0.1, 1.0],
//!     vec![0.0, -0.1, -1.0],
//! ];
//!
//! let labels = ModKMeans::new(2).with_seed(7).with_n_init(4).fit_predict(&data).unwrap();
//! assert_eq!(labels[0], labels[1]); // opposite polarity, same state
//! assert_ne!(labels[0], labels[2]);
//!
//! let labels = Aahc::new(2).fit_predict(&data).unwrap();
//! assert_eq!(labels[2], labels[3]);
//! ```

mod aahc;
mod kmeans;
mod traits;
pub(crate) mod util;

pub use aahc::Aahc;
pub use kmeans::ModKMeans;
pub use traits::{CancelToken, CenterFit, Clustering};
