//! Temporal smoothing of a backfitted label sequence.
//!
//! Microstates persist for tens of milliseconds, so single-sample flicker in a
//! backfitted sequence is noise. The [`Smoother`] applies, in order:
//!
//! 1. **Edge rejection** (optional): the first and last segments are cut by the
//!    recording boundaries and are set to unlabeled.
//! 2. **Windowed vote** (optional, `half_window > 0`): every labeled sample
//!    takes the most frequent label within `[t - h, t + h]`.
//! 3. **Short-segment rejection**: every labeled run shorter than
//!    `min_segment_length` is eroded from both ends into its labeled neighbors.
//!    At each step the leftmost sample is compared with the left neighbor's
//!    center and the rightmost sample with the right neighbor's center; the
//!    better fit claims its sample (left wins ties). A run with one labeled
//!    neighbor merges into it; a run with none is rejected to unlabeled.
//!
//! Step 3 only ever merges runs, so the number of segments strictly decreases
//! on every pass that changes something, and no label that was absent before
//! smoothing can appear after it. Unlabeled runs are exempt from the minimum.
//!
//! Reassigned samples get their correlation recomputed against the new center
//! but are never unlabeled for falling below the backfit `min_correlation`:
//! the smoother does not know that threshold, and unlabeling mid-pass would
//! split runs again. Callers that need the threshold afterwards can filter on
//! [`Assignment::correlations`].

use tracing::{debug, warn};

use crate::backfit::Assignment;
use crate::cluster::util::check_dimensions;
use crate::error::{Error, Result};
use crate::segment::segments;
use crate::similarity::similarity;

/// Smoothing configuration. See the module docs for the algorithm.
///
/// A sample moved to a neighbor's label keeps that label even when its new
/// correlation is below the threshold used at backfit time.
#[derive(Debug, Clone)]
pub struct Smoother {
    min_segment_length: usize,
    half_window: usize,
    reject_edges: bool,
    max_passes: usize,
}

impl Default for Smoother {
    fn default() -> Self {
        Self {
            min_segment_length: 0,
            half_window: 0,
            reject_edges: false,
            max_passes: 1000,
        }
    }
}

impl Smoother {
    /// Create a smoother enforcing a minimum labeled-run length in samples.
    pub fn new(min_segment_length: usize) -> Self {
        Self {
            min_segment_length,
            ..Self::default()
        }
    }

    /// Half-width of the majority-vote window (0 disables the vote).
    pub fn with_half_window(mut self, half_window: usize) -> Self {
        self.half_window = half_window;
        self
    }

    /// Mark the first and last segments as unlabeled.
    pub fn with_reject_edges(mut self, reject_edges: bool) -> Self {
        self.reject_edges = reject_edges;
        self
    }

    /// Upper bound on short-segment rejection passes.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Smooth `assignment`, a backfit of `signal` onto `centers`.
    ///
    /// Returns a new assignment; correlations of reassigned samples are
    /// recomputed against their new centers.
    pub fn smooth(
        &self,
        assignment: &Assignment,
        centers: &[Vec<f32>],
        signal: &[Vec<f32>],
    ) -> Result<Assignment> {
        let n = assignment.len();
        if assignment.correlations.len() != n || assignment.norms.len() != n {
            return Err(Error::InvalidParameter {
                name: "assignment",
                message: "labels, correlations and norms must have equal length",
            });
        }
        if signal.len() != n {
            return Err(Error::InvalidParameter {
                name: "signal",
                message: "must have one sample per label",
            });
        }
        let d = check_dimensions(centers)?;
        if n == 0 {
            return Ok(assignment.clone());
        }
        let found = check_dimensions(signal)?;
        if found != d {
            return Err(Error::DimensionMismatch { expected: d, found });
        }
        let k = centers.len();
        if assignment.labels.iter().flatten().any(|&l| l >= k) {
            return Err(Error::InvalidParameter {
                name: "labels",
                message: "label out of range for cluster count",
            });
        }

        let mut out = assignment.clone();

        if self.reject_edges {
            reject_edge_segments(&mut out.labels);
        }
        if self.half_window > 0 {
            self.majority_vote(&mut out, centers, signal, k);
        }
        if self.min_segment_length > 1 {
            self.reject_short_segments(&mut out, centers, signal);
        }

        Ok(out)
    }

    fn majority_vote(
        &self,
        out: &mut Assignment,
        centers: &[Vec<f32>],
        signal: &[Vec<f32>],
        k: usize,
    ) {
        let before = out.labels.clone();
        let n = before.len();
        let mut counts = vec![0usize; k];

        for t in 0..n {
            let Some(current) = before[t] else { continue };
            counts.iter_mut().for_each(|c| *c = 0);
            let lo = t.saturating_sub(self.half_window);
            let hi = (t + self.half_window + 1).min(n);
            for l in before[lo..hi].iter().flatten() {
                counts[*l] += 1;
            }

            let max = counts.iter().copied().max().unwrap_or(0);
            let winner = if counts[current] == max {
                current
            } else {
                counts.iter().position(|&c| c == max).unwrap_or(current)
            };
            if winner != current {
                out.labels[t] = Some(winner);
                out.correlations[t] = similarity(&centers[winner], &signal[t]);
            }
        }
    }

    fn reject_short_segments(&self, out: &mut Assignment, centers: &[Vec<f32>], signal: &[Vec<f32>]) {
        let n = out.labels.len();
        for pass in 0..self.max_passes {
            let mut changed = false;

            for seg in segments(&out.labels) {
                let Some(label) = seg.label else { continue };
                if seg.duration() >= self.min_segment_length {
                    continue;
                }
                let left = if seg.start > 0 { out.labels[seg.start - 1] } else { None };
                let right = if seg.end < n { out.labels[seg.end] } else { None };
                // A neighbor processed earlier in this pass may have merged into
                // this run; re-examine it on the next pass.
                if left == Some(label) || right == Some(label) {
                    continue;
                }

                match (left, right) {
                    (Some(l), Some(r)) => {
                        let (mut i, mut j) = (seg.start, seg.end);
                        while i < j {
                            let sl = similarity(&centers[l], &signal[i]);
                            let sr = similarity(&centers[r], &signal[j - 1]);
                            if sl >= sr {
                                out.labels[i] = Some(l);
                                out.correlations[i] = sl;
                                i += 1;
                            } else {
                                j -= 1;
                                out.labels[j] = Some(r);
                                out.correlations[j] = sr;
                            }
                        }
                    }
                    (Some(only), None) | (None, Some(only)) => {
                        for t in seg.start..seg.end {
                            out.labels[t] = Some(only);
                            out.correlations[t] = similarity(&centers[only], &signal[t]);
                        }
                    }
                    (None, None) => {
                        for t in seg.start..seg.end {
                            out.labels[t] = None;
                        }
                    }
                }
                changed = true;
            }

            if !changed {
                debug!(passes = pass, "short-segment rejection settled");
                return;
            }
        }

        let remaining = segments(&out.labels)
            .iter()
            .filter(|s| s.label.is_some() && s.duration() < self.min_segment_length)
            .count();
        if remaining > 0 {
            warn!(
                max_passes = self.max_passes,
                remaining, "short-segment rejection hit its pass limit"
            );
        }
    }
}

fn reject_edge_segments(labels: &mut [Option<usize>]) {
    let segs = segments(labels);
    if let Some(first) = segs.first() {
        labels[first.start..first.end].fill(None);
    }
    if let Some(last) = segs.last() {
        labels[last.start..last.end].fill(None);
    }
}
