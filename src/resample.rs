//! Random resampling of a recording into epochs of scattered samples.
//!
//! Fitting several cluster sets on random subsets (and comparing them) is a
//! cheap stability check. The output discards temporal order and is only
//! meant as clustering input.

use rand::prelude::*;
use tracing::info;

use crate::cluster::util::check_dimensions;
use crate::error::{Error, Result};

/// How many epochs to draw and how large each one is.
///
/// Exactly two of `n_epochs`, `n_samples` and `coverage` need to be set; the
/// third is derived. When all three are set, `coverage` is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleOptions {
    /// Number of epochs.
    pub n_epochs: Option<usize>,
    /// Samples per epoch.
    pub n_samples: Option<usize>,
    /// Drawn samples divided by recording length; may exceed 1 with replacement.
    pub coverage: Option<f64>,
    /// Draw with replacement.
    pub replace: bool,
    /// Drawn from the OS when `None`.
    pub seed: Option<u64>,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self {
            n_epochs: None,
            n_samples: None,
            coverage: None,
            replace: true,
            seed: None,
        }
    }
}

impl ResampleOptions {
    /// Resolve `(n_epochs, n_samples, total drawn)` for a recording of
    /// `n_times` samples.
    fn resolve(&self, n_times: usize) -> Result<(usize, usize, usize)> {
        let given = [
            self.n_epochs.is_some(),
            self.n_samples.is_some(),
            self.coverage.is_some(),
        ]
        .iter()
        .filter(|&&g| g)
        .count();
        if given < 2 {
            return Err(Error::InvalidParameter {
                name: "n_epochs/n_samples/coverage",
                message: "at least two must be set",
            });
        }
        if let Some(c) = self.coverage {
            if !(c > 0.0) || !c.is_finite() {
                return Err(Error::InvalidParameter {
                    name: "coverage",
                    message: "must be strictly positive",
                });
            }
        }

        let total = n_times as f64;
        let (n_epochs, n_samples) = match (self.n_epochs, self.n_samples, self.coverage) {
            (Some(e), Some(s), _) => (e, s),
            (None, Some(s), Some(c)) => {
                let e = if s == 0 { 0 } else { (total * c / s as f64) as usize };
                (e, s)
            }
            (Some(e), None, Some(c)) => {
                let s = if e == 0 { 0 } else { (total * c / e as f64) as usize };
                (e, s)
            }
            _ => {
                return Err(Error::InvalidParameter {
                    name: "n_epochs/n_samples/coverage",
                    message: "at least two must be set",
                })
            }
        };

        if n_epochs == 0 || n_samples == 0 {
            return Err(Error::InvalidParameter {
                name: "n_epochs/n_samples",
                message: "resolved epoch count and size must be at least 1",
            });
        }
        let drawn = n_epochs.checked_mul(n_samples).ok_or(Error::InvalidParameter {
            name: "n_epochs/n_samples",
            message: "total sample count overflows",
        })?;
        if !self.replace && drawn > n_times {
            return Err(Error::InvalidParameter {
                name: "replace",
                message: "more samples requested than the recording holds",
            });
        }
        Ok((n_epochs, n_samples, drawn))
    }
}

/// Draw epochs of random samples from `data` (samples × channels).
///
/// Returns `n_epochs` matrices of `n_samples` rows each. Without replacement,
/// no sample appears twice across all epochs.
pub fn resample(data: &[Vec<f32>], options: &ResampleOptions) -> Result<Vec<Vec<Vec<f32>>>> {
    check_dimensions(data)?;
    let n_times = data.len();
    let (n_epochs, n_samples, drawn) = options.resolve(n_times)?;

    let seed = options.seed.unwrap_or_else(|| rand::rng().random());
    let mut rng = StdRng::seed_from_u64(seed);

    let indices: Vec<usize> = if options.replace {
        (0..drawn)
            .map(|_| rng.random_range(0..n_times))
            .collect()
    } else {
        rand::seq::index::sample(&mut rng, n_times, drawn).into_vec()
    };

    info!(
        n_epochs,
        n_samples,
        coverage = drawn as f64 / n_times as f64,
        replace = options.replace,
        "resampled recording"
    );

    Ok(indices
        .chunks_exact(n_samples)
        .map(|epoch| epoch.iter().map(|&i| data[i].clone()).collect())
        .collect())
}
