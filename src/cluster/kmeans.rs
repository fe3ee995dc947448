//! Modified k-means for polarity-invariant topographies.
//!
//! # The Algorithm (Pascual-Marqui et al., 1995)
//!
//! Ordinary k-means measures Euclidean distance, which treats a map `x` and its
//! negation `-x` as maximally different. In EEG both describe the same source
//! configuration, so the modified variant replaces distance with the absolute
//! spatial correlation `|cos(x, c)|`:
//!
//! 1. **Init**: pick `k` distinct rows at random as the initial centers.
//! 2. **Assign**: each row goes to the center with the largest `|cos|`; the sign
//!    of the dot product is kept for step 3.
//! 3. **Update**: each center becomes the normalized mean of its members, each
//!    member flipped to agree in sign with the current center.
//! 4. **Converge**: stop once the relative change in GEV drops to
//!    `tol`, or after `max_iter` iterations (reported, not an error).
//!
//! The whole procedure is repeated `n_init` times with seeds
//! `seed, seed + 1, …`; the run with the highest GEV wins (ties: fewer
//! iterations, then the earlier restart).
//!
//! ## Empty clusters
//!
//! When a center loses every member it is reseeded from the row that is
//! currently worst explained by any center. If every row is already explained
//! perfectly (fewer distinct directions than `k`), the restart fails with
//! [`Error::EmptyCluster`].
//!
//! ## References
//!
//! Pascual-Marqui, R. D., Michel, C. M., Lehmann, D. (1995). "Segmentation of
//! brain electrical activity into microstates: model estimation and
//! validation." IEEE Trans. Biomed. Eng. 42(7).

use rand::prelude::*;
use tracing::debug;

use super::traits::{CancelToken, CenterFit, Clustering};
use super::util::{accumulate_aligned, check_dimensions, norm, normalize_in_place};
use crate::backfit::{best_match, TIE_TOLERANCE};
use crate::error::{Error, Result};
use crate::metrics::compute_gev;
use crate::similarity::similarity;

/// Modified k-means clusterer.
#[derive(Debug, Clone)]
pub struct ModKMeans {
    k: usize,
    max_iter: usize,
    tol: f64,
    n_init: usize,
    seed: Option<u64>,
    cancel: Option<CancelToken>,
}

impl ModKMeans {
    /// Create a clusterer for `k` centers.
    ///
    /// Defaults: `max_iter = 300`, `tol = 1e-6`, `n_init = 100`, random seed.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            tol: 1e-6,
            n_init: 100,
            seed: None,
            cancel: None,
        }
    }

    /// Maximum iterations per restart.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Relative GEV change under which a restart counts as converged.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Number of independent restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Base seed; restart `r` uses `seed + r`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Abort between restarts and iterations once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn validate(&self, data: &[Vec<f32>]) -> Result<usize> {
        let d = check_dimensions(data)?;
        if self.k == 0 || self.k > data.len() {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: data.len(),
            });
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        if !(self.tol >= 0.0) || !self.tol.is_finite() {
            return Err(Error::InvalidParameter {
                name: "tol",
                message: "must be non-negative and finite",
            });
        }
        if self.n_init == 0 {
            return Err(Error::InvalidParameter {
                name: "n_init",
                message: "must be at least 1",
            });
        }
        Ok(d)
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// One restart from `seed`.
    fn run(&self, data: &[Vec<f32>], norms: &[f32], d: usize, seed: u64) -> Result<CenterFit> {
        self.check_cancel()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut centers = Vec::with_capacity(self.k);
        for idx in rand::seq::index::sample(&mut rng, data.len(), self.k) {
            let mut c = data[idx].clone();
            if !normalize_in_place(&mut c) {
                return Err(Error::DegenerateVector { index: idx });
            }
            centers.push(c);
        }

        let mut part = Partition::assign(&centers, data);
        let mut gev = part.gev(norms, self.k)?;
        let mut converged = false;
        let mut n_iter = 0;

        for it in 1..=self.max_iter {
            self.check_cancel()?;

            update_centers(&mut centers, data, &mut part, d)?;
            part = Partition::assign(&centers, data);
            let new_gev = part.gev(norms, self.k)?;
            n_iter = it;

            let delta = (new_gev - gev).abs();
            gev = new_gev;
            if delta <= self.tol * new_gev.abs() {
                converged = true;
                break;
            }
        }

        Ok(CenterFit {
            centers,
            gev,
            n_iter,
            converged,
            seed: Some(seed),
        })
    }
}

impl Default for ModKMeans {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Clustering for ModKMeans {
    fn fit_centers(&self, data: &[Vec<f32>]) -> Result<CenterFit> {
        let d = self.validate(data)?;
        self.check_cancel()?;

        let norms: Vec<f32> = data.iter().map(|x| norm(x)).collect();
        let base = self.seed.unwrap_or_else(|| rand::rng().random());
        let seeds: Vec<u64> = (0..self.n_init as u64).map(|r| base.wrapping_add(r)).collect();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<Result<CenterFit>> = {
            use rayon::prelude::*;
            seeds
                .par_iter()
                .map(|&s| self.run(data, &norms, d, s))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Result<CenterFit>> = seeds
            .iter()
            .map(|&s| self.run(data, &norms, d, s))
            .collect();

        reduce_restarts(outcomes)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}

/// Whether `candidate` beats `incumbent`: higher GEV, then fewer iterations.
/// Full ties keep the incumbent, so the earlier restart wins.
fn is_better(candidate: &CenterFit, incumbent: &CenterFit) -> bool {
    candidate.gev > incumbent.gev
        || (candidate.gev == incumbent.gev && candidate.n_iter < incumbent.n_iter)
}

/// Pick the best restart. Outcomes are visited in restart order, so serial
/// and parallel runs agree.
fn reduce_restarts(outcomes: Vec<Result<CenterFit>>) -> Result<CenterFit> {
    let mut best: Option<CenterFit> = None;
    let mut first_err: Option<Error> = None;
    for (restart, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(fit) => {
                debug!(
                    restart,
                    seed = fit.seed,
                    gev = fit.gev,
                    n_iter = fit.n_iter,
                    converged = fit.converged,
                    "modified k-means restart finished"
                );
                if best.as_ref().map_or(true, |b| is_better(&fit, b)) {
                    best = Some(fit);
                }
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                debug!(restart, error = %e, "modified k-means restart failed");
                first_err.get_or_insert(e);
            }
        }
    }

    match best {
        Some(fit) => Ok(fit),
        None => Err(first_err.unwrap_or(Error::EmptyInput)),
    }
}

/// Assignment of every row to its best center.
struct Partition {
    labels: Vec<usize>,
    values: Vec<f32>,
    signs: Vec<f32>,
}

impl Partition {
    fn assign(centers: &[Vec<f32>], data: &[Vec<f32>]) -> Self {
        let mut labels = Vec::with_capacity(data.len());
        let mut values = Vec::with_capacity(data.len());
        let mut signs = Vec::with_capacity(data.len());
        for x in data {
            let (idx, corr) = best_match(centers, x);
            labels.push(idx);
            values.push(corr.value);
            signs.push(corr.sign);
        }
        Self {
            labels,
            values,
            signs,
        }
    }

    fn gev(&self, norms: &[f32], k: usize) -> Result<f64> {
        let labels: Vec<Option<usize>> = self.labels.iter().map(|&l| Some(l)).collect();
        Ok(compute_gev(&labels, &self.values, norms, k)?.total)
    }
}

/// Sign-aligned mean update, reseeding empty clusters.
fn update_centers(
    centers: &mut [Vec<f32>],
    data: &[Vec<f32>],
    part: &mut Partition,
    d: usize,
) -> Result<()> {
    let k = centers.len();
    let mut sums = vec![vec![0.0f32; d]; k];
    let mut counts = vec![0usize; k];
    for (i, x) in data.iter().enumerate() {
        let l = part.labels[i];
        accumulate_aligned(&mut sums[l], x, part.signs[i]);
        counts[l] += 1;
    }

    for (j, (sum, &count)) in sums.into_iter().zip(&counts).enumerate() {
        if count == 0 {
            reseed(centers, j, data, part)?;
            continue;
        }
        let mut c = sum;
        // Members orthogonal to the old center can cancel out; keep the old
        // center in that case.
        if normalize_in_place(&mut c) {
            centers[j] = c;
        }
    }
    Ok(())
}

fn reseed(centers: &mut [Vec<f32>], j: usize, data: &[Vec<f32>], part: &mut Partition) -> Result<()> {
    let worst = part
        .values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, &v)| (i, v));
    let Some((idx, value)) = worst else {
        return Err(Error::EmptyCluster { cluster: j });
    };
    if value >= 1.0 - TIE_TOLERANCE {
        return Err(Error::EmptyCluster { cluster: j });
    }

    let mut c = data[idx].clone();
    if !normalize_in_place(&mut c) {
        return Err(Error::EmptyCluster { cluster: j });
    }
    debug!(cluster = j, sample = idx, correlation = value, "reseeding empty cluster");
    // Rows the new center explains better must not be picked again for the
    // next empty cluster of this iteration.
    for (value, x) in part.values.iter_mut().zip(data) {
        *value = value.max(similarity(&c, x));
    }
    part.values[idx] = 1.0;
    centers[j] = c;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hadamard4() -> Vec<Vec<f32>> {
        vec![
            vec![0.5, 0.5, 0.5, 0.5],
            vec![0.5, -0.5, 0.5, -0.5],
            vec![0.5, 0.5, -0.5, -0.5],
            vec![0.5, -0.5, -0.5, 0.5],
        ]
    }

    fn noisy_copies(base: &[Vec<f32>], copies: usize) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for (b, v) in base.iter().enumerate() {
            for i in 0..copies {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                let mut x: Vec<f32> = v
                    .iter()
                    .enumerate()
                    .map(|(c, &val)| sign * (val + 0.02 * (((i * 7 + c * 13 + b) % 5) as f32 - 2.0)))
                    .collect();
                normalize_in_place(&mut x);
                out.push(x);
            }
        }
        out
    }

    #[test]
    fn recovers_orthogonal_maps_with_flipped_polarity() {
        let base = hadamard4();
        let data = noisy_copies(&base, 12);
        let fit = ModKMeans::new(4)
            .with_n_init(10)
            .with_seed(3)
            .fit_centers(&data)
            .unwrap();

        assert_eq!(fit.centers.len(), 4);
        for b in &base {
            let best = fit
                .centers
                .iter()
                .map(|c| similarity(c, b))
                .fold(0.0f32, f32::max);
            assert!(best > 0.99, "map not recovered: {best}");
        }
        assert!(fit.gev > 0.95);
    }

    #[test]
    fn centers_are_unit_norm() {
        let data = noisy_copies(&hadamard4(), 5);
        let fit = ModKMeans::new(3)
            .with_n_init(3)
            .with_seed(11)
            .fit_centers(&data)
            .unwrap();
        for c in &fit.centers {
            approx::assert_abs_diff_eq!(norm(c), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn same_seed_is_bit_identical() {
        let data = noisy_copies(&hadamard4(), 6);
        let model = ModKMeans::new(4).with_n_init(5).with_seed(42);
        let a = model.fit_centers(&data).unwrap();
        let b = model.fit_centers(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_cluster_is_reseeded() {
        // Seed picks may land on two copies of the same map; the fit must still
        // recover all four directions.
        let mut data = Vec::new();
        for v in hadamard4() {
            for _ in 0..10 {
                data.push(v.clone());
            }
        }
        for seed in 0..8 {
            let fit = ModKMeans::new(4)
                .with_n_init(1)
                .with_seed(seed)
                .fit_centers(&data)
                .unwrap();
            approx::assert_abs_diff_eq!(fit.gev, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn too_few_distinct_maps_is_an_error() {
        let data = vec![vec![1.0f32, 0.0]; 3];
        let err = ModKMeans::new(2)
            .with_n_init(2)
            .with_seed(0)
            .fit_centers(&data)
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCluster { .. }));
    }

    #[test]
    fn non_convergence_is_reported() {
        let data = noisy_copies(&hadamard4(), 8);
        let fit = ModKMeans::new(4)
            .with_n_init(1)
            .with_max_iter(1)
            .with_tol(0.0)
            .with_seed(5)
            .fit_centers(&data)
            .unwrap();
        assert_eq!(fit.n_iter, 1);
        assert!(!fit.converged);
    }

    #[test]
    fn invalid_parameters() {
        let data = vec![vec![1.0f32, 0.0], vec![0.0, 1.0]];
        assert!(matches!(
            ModKMeans::new(0).fit_centers(&data),
            Err(Error::InvalidClusterCount { .. })
        ));
        assert!(matches!(
            ModKMeans::new(3).fit_centers(&data),
            Err(Error::InvalidClusterCount {
                requested: 3,
                n_items: 2
            })
        ));
        assert!(ModKMeans::new(1).with_tol(-1.0).fit_centers(&data).is_err());
        assert!(ModKMeans::new(1).with_n_init(0).fit_centers(&data).is_err());
        assert!(ModKMeans::new(1).with_max_iter(0).fit_centers(&data).is_err());
        assert!(matches!(
            ModKMeans::new(1).fit_centers(&[]),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn cancelled_fit_returns_no_centers() {
        let data = noisy_copies(&hadamard4(), 4);
        let token = CancelToken::new();
        token.cancel();
        let err = ModKMeans::new(2)
            .with_seed(1)
            .with_cancel(token)
            .fit_centers(&data)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn fit_predict_labels_in_range() {
        let data = noisy_copies(&hadamard4(), 3);
        let labels = ModKMeans::new(4)
            .with_n_init(2)
            .with_seed(9)
            .fit_predict(&data)
            .unwrap();
        assert_eq!(labels.len(), data.len());
        assert!(labels.iter().all(|&l| l < 4));
    }

    fn restart(gev: f64, n_iter: usize, seed: u64) -> CenterFit {
        CenterFit {
            centers: vec![vec![1.0, 0.0]],
            gev,
            n_iter,
            converged: true,
            seed: Some(seed),
        }
    }

    #[test]
    fn restart_selection_prefers_gev_then_fewer_iterations() {
        assert!(is_better(&restart(0.9, 50, 1), &restart(0.8, 3, 0)));
        assert!(!is_better(&restart(0.8, 3, 1), &restart(0.9, 50, 0)));
        assert!(is_better(&restart(0.9, 4, 1), &restart(0.9, 7, 0)));
        assert!(!is_better(&restart(0.9, 7, 1), &restart(0.9, 7, 0)));

        let best = reduce_restarts(vec![
            Ok(restart(0.9, 7, 10)),
            Ok(restart(0.9, 4, 11)),
            Ok(restart(0.9, 4, 12)),
            Ok(restart(0.5, 1, 13)),
        ])
        .unwrap();
        assert_eq!(best.seed, Some(11));
    }

    #[test]
    fn failed_restarts_are_skipped_unless_all_fail() {
        let best = reduce_restarts(vec![
            Err(Error::EmptyCluster { cluster: 1 }),
            Ok(restart(0.7, 2, 21)),
        ])
        .unwrap();
        assert_eq!(best.seed, Some(21));

        let err = reduce_restarts(vec![
            Err(Error::EmptyCluster { cluster: 1 }),
            Err(Error::EmptyCluster { cluster: 0 }),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::EmptyCluster { cluster: 1 }));

        let err = reduce_restarts(vec![Ok(restart(0.7, 2, 21)), Err(Error::Cancelled)]).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn fit_matches_serial_reduction_of_its_seeds() {
        // With the `parallel` feature this compares the rayon path against a
        // plain sequential loop over the same seeds.
        let data = noisy_copies(&hadamard4(), 6);
        let norms: Vec<f32> = data.iter().map(|x| norm(x)).collect();
        let model = ModKMeans::new(4).with_n_init(8).with_seed(100);
        let serial: Vec<Result<CenterFit>> = (100..108u64)
            .map(|s| model.run(&data, &norms, 4, s))
            .collect();
        let expected = reduce_restarts(serial).unwrap();
        assert_eq!(model.fit_centers(&data).unwrap(), expected);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_restarts_are_bit_identical_across_runs() {
        let data = noisy_copies(&hadamard4(), 10);
        let model = ModKMeans::new(4).with_n_init(32).with_seed(7);
        let first = model.fit_centers(&data).unwrap();
        for _ in 0..4 {
            assert_eq!(model.fit_centers(&data).unwrap(), first);
        }
    }
}
