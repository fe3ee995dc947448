//! Segments and per-recording segment statistics.
//!
//! A segment is a maximal run of identical labels. Segments are never stored;
//! they are derived from a label sequence whenever needed.

use crate::error::{Error, Result};

/// A maximal run of identical labels, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First sample of the run.
    pub start: usize,
    /// One past the last sample of the run.
    pub end: usize,
    /// Label shared by every sample in the run (`None` for unlabeled runs).
    pub label: Option<usize>,
}

impl Segment {
    /// Number of samples in the run.
    pub fn duration(&self) -> usize {
        self.end - self.start
    }
}

/// Split a label sequence into its maximal runs, unlabeled runs included.
pub fn segments(labels: &[Option<usize>]) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut start = 0;
    for t in 1..=labels.len() {
        if t == labels.len() || labels[t] != labels[start] {
            out.push(Segment {
                start,
                end: t,
                label: labels[start],
            });
            start = t;
        }
    }
    out
}

/// Temporal parameters of one cluster within a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    /// Cluster index.
    pub cluster: usize,
    /// Number of segments carrying this label.
    pub n_segments: usize,
    /// Mean segment duration in seconds (0.0 when the cluster never occurs).
    pub mean_duration: f64,
    /// Fraction of labeled samples carrying this label.
    pub time_coverage: f64,
    /// Segments per second of recording.
    pub occurrences: f64,
}

/// Compute [`SegmentStats`] for clusters `0..k`.
pub fn segment_stats(labels: &[Option<usize>], k: usize, sfreq: f64) -> Result<Vec<SegmentStats>> {
    if !(sfreq > 0.0) || !sfreq.is_finite() {
        return Err(Error::InvalidParameter {
            name: "sfreq",
            message: "must be positive and finite",
        });
    }
    if labels.is_empty() {
        return Err(Error::EmptyInput);
    }

    let mut n_segments = vec![0usize; k];
    let mut n_samples = vec![0usize; k];
    let mut labeled = 0usize;
    for seg in segments(labels) {
        let Some(label) = seg.label else { continue };
        if label >= k {
            return Err(Error::InvalidParameter {
                name: "labels",
                message: "label out of range for cluster count",
            });
        }
        n_segments[label] += 1;
        n_samples[label] += seg.duration();
        labeled += seg.duration();
    }

    let total_seconds = labels.len() as f64 / sfreq;
    Ok((0..k)
        .map(|cluster| {
            let segs = n_segments[cluster];
            let samples = n_samples[cluster];
            SegmentStats {
                cluster,
                n_segments: segs,
                mean_duration: if segs == 0 {
                    0.0
                } else {
                    samples as f64 / segs as f64 / sfreq
                },
                time_coverage: if labeled == 0 {
                    0.0
                } else {
                    samples as f64 / labeled as f64
                },
                occurrences: segs as f64 / total_seconds,
            }
        })
        .collect())
}

/// Counts and row-normalized probabilities of transitions between segments.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    /// `counts[from][to]`.
    pub counts: Vec<Vec<usize>>,
    /// `counts` divided by row sums; all-zero rows stay zero.
    pub probabilities: Vec<Vec<f64>>,
}

/// Count transitions between consecutive labeled segments.
///
/// When `skip_unlabeled` is false an unlabeled run breaks the chain: no
/// transition is counted across it. When true, the labeled segments on either
/// side of the gap are treated as adjacent (and a gap between two runs of the
/// same label is not a transition).
pub fn transition_matrix(
    labels: &[Option<usize>],
    k: usize,
    skip_unlabeled: bool,
) -> Result<TransitionMatrix> {
    let mut counts = vec![vec![0usize; k]; k];
    let mut prev: Option<usize> = None;
    for seg in segments(labels) {
        match seg.label {
            Some(label) => {
                if label >= k {
                    return Err(Error::InvalidParameter {
                        name: "labels",
                        message: "label out of range for cluster count",
                    });
                }
                if let Some(p) = prev {
                    if p != label {
                        counts[p][label] += 1;
                    }
                }
                prev = Some(label);
            }
            None if !skip_unlabeled => prev = None,
            None => {}
        }
    }

    let probabilities = counts
        .iter()
        .map(|row| {
            let total: usize = row.iter().sum();
            row.iter()
                .map(|&c| if total == 0 { 0.0 } else { c as f64 / total as f64 })
                .collect()
        })
        .collect();

    Ok(TransitionMatrix {
        counts,
        probabilities,
    })
}
