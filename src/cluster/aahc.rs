//! Agglomerative polarity-invariant clustering.
//!
//! Every row starts as its own cluster. At each step the two clusters whose
//! merge costs the least explained variance are joined, until `k` remain.
//! There is no randomness and no restart loop, which makes this strategy a
//! useful deterministic baseline for the modified k-means.
//!
//! ## Merge cost
//!
//! A cluster `S` with center `c` explains `EV(S) = Σ_{x ∈ S} (x · c)²`. The
//! center of a merged cluster is the normalized sum of both clusters'
//! sign-aligned member sums, flipped so the two sums agree. The cost of merging
//! `A` and `B` is `EV(A) + EV(B) - EV(A ∪ B)`. Ties go to the lowest
//! `(a, b)` index pair.
//!
//! ## Complexity
//!
//! O(n²) memory for the cost table; each merge refreshes one row of it, so
//! the whole run costs O(n² · m · d) where `m` is the typical cluster size.
//! Intended for GFP-peak sized inputs (hundreds to a few thousand rows).

use tracing::debug;

use super::traits::{CancelToken, CenterFit, Clustering};
use super::util::{
    accumulate_aligned, check_dimensions, dot, norm, normalize_in_place, NORM_EPSILON,
};
use crate::backfit::best_match;
use crate::error::{Error, Result};
use crate::metrics::compute_gev;

/// Atomize-and-agglomerate hierarchical clusterer.
#[derive(Debug, Clone)]
pub struct Aahc {
    k: usize,
    cancel: Option<CancelToken>,
}

impl Aahc {
    /// Create a clusterer for `k` centers.
    pub fn new(k: usize) -> Self {
        Self { k, cancel: None }
    }

    /// Abort between merges once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    members: Vec<usize>,
    /// Sum of members, each flipped to agree with `center`.
    aligned_sum: Vec<f32>,
    center: Vec<f32>,
    explained: f64,
}

impl Node {
    fn singleton(idx: usize, x: &[f32]) -> Self {
        let mut center = x.to_vec();
        normalize_in_place(&mut center);
        let explained = f64::from(dot(x, &center)).powi(2);
        Self {
            members: vec![idx],
            aligned_sum: x.to_vec(),
            center,
            explained,
        }
    }
}

/// Center and explained variance of `a ∪ b`, without building the node.
fn merged_center(a: &Node, b: &Node, data: &[Vec<f32>]) -> (Vec<f32>, f64) {
    let sign = if dot(&a.aligned_sum, &b.aligned_sum) < 0.0 { -1.0 } else { 1.0 };
    let mut center = a.aligned_sum.clone();
    accumulate_aligned(&mut center, &b.aligned_sum, sign);
    if !normalize_in_place(&mut center) {
        center = a.center.clone();
    }
    let explained = a
        .members
        .iter()
        .chain(&b.members)
        .map(|&i| f64::from(dot(&data[i], &center)).powi(2))
        .sum();
    (center, explained)
}

fn merge(a: &Node, b: &Node, data: &[Vec<f32>]) -> Node {
    let (center, explained) = merged_center(a, b, data);
    let mut members = a.members.clone();
    members.extend_from_slice(&b.members);
    members.sort_unstable();

    let mut aligned_sum = vec![0.0f32; center.len()];
    for &i in &members {
        let s = if dot(&data[i], &center) < 0.0 { -1.0 } else { 1.0 };
        accumulate_aligned(&mut aligned_sum, &data[i], s);
    }
    Node {
        members,
        aligned_sum,
        center,
        explained,
    }
}

fn merge_cost(a: &Node, b: &Node, data: &[Vec<f32>]) -> f64 {
    let (_, explained) = merged_center(a, b, data);
    a.explained + b.explained - explained
}

impl Clustering for Aahc {
    fn fit_centers(&self, data: &[Vec<f32>]) -> Result<CenterFit> {
        check_dimensions(data)?;
        let n = data.len();
        if self.k == 0 || self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }
        for (i, x) in data.iter().enumerate() {
            if norm(x) <= NORM_EPSILON {
                return Err(Error::DegenerateVector { index: i });
            }
        }

        let mut nodes: Vec<Option<Node>> = data
            .iter()
            .enumerate()
            .map(|(i, x)| Some(Node::singleton(i, x)))
            .collect();

        // Upper-triangular cost table; `cost[a * n + b]` for a < b.
        let mut cost = vec![f64::INFINITY; n * n];
        for a in 0..n {
            for b in (a + 1)..n {
                if let (Some(na), Some(nb)) = (&nodes[a], &nodes[b]) {
                    cost[a * n + b] = merge_cost(na, nb, data);
                }
            }
        }

        let mut active = n;
        let mut merges = 0;
        while active > self.k {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }

            let mut best = (usize::MAX, usize::MAX, f64::INFINITY);
            for a in 0..n {
                if nodes[a].is_none() {
                    continue;
                }
                for b in (a + 1)..n {
                    if nodes[b].is_none() {
                        continue;
                    }
                    let c = cost[a * n + b];
                    if c < best.2 {
                        best = (a, b, c);
                    }
                }
            }
            let (a, b, loss) = best;
            if a == usize::MAX {
                return Err(Error::InvalidParameter {
                    name: "vectors",
                    message: "merge costs are not finite",
                });
            }
            let (Some(na), Some(nb)) = (nodes[a].take(), nodes[b].take()) else {
                return Err(Error::EmptyCluster { cluster: a });
            };
            nodes[a] = Some(merge(&na, &nb, data));
            active -= 1;
            merges += 1;

            if let Some(merged) = &nodes[a] {
                for other in 0..n {
                    if other == a {
                        continue;
                    }
                    if let Some(no) = &nodes[other] {
                        let (lo, hi) = if other < a { (other, a) } else { (a, other) };
                        cost[lo * n + hi] = merge_cost(merged, no, data);
                    }
                }
            }

            if active % 64 == 0 {
                debug!(active, loss, "agglomerative merge progress");
            }
        }

        let centers: Vec<Vec<f32>> = nodes.into_iter().flatten().map(|node| node.center).collect();

        let mut labels = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);
        let mut norms = Vec::with_capacity(n);
        for x in data {
            let (idx, corr) = best_match(&centers, x);
            labels.push(Some(idx));
            values.push(corr.value);
            norms.push(norm(x));
        }
        let gev = compute_gev(&labels, &values, &norms, centers.len())?.total;

        Ok(CenterFit {
            centers,
            gev,
            n_iter: merges,
            converged: true,
            seed: None,
        })
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}
