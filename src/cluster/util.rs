use crate::error::{Error, Result};

/// Norms below this are treated as zero (flat topography).
pub(crate) const NORM_EPSILON: f32 = 1e-12;

/// A re-referenced map whose norm dropped below this fraction of its original
/// norm is flat; what remains is rounding residue.
pub(crate) const FLAT_TOLERANCE: f32 = 1e-6;

#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub(crate) fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Scale `v` to unit norm. Returns `false` (and leaves `v` untouched) when the
/// norm is numerically zero.
pub(crate) fn normalize_in_place(v: &mut [f32]) -> bool {
    let n = norm(v);
    if !n.is_finite() || n <= NORM_EPSILON {
        return false;
    }
    for x in v {
        *x /= n;
    }
    true
}

/// Add `sign * x` into `acc`.
#[inline]
pub(crate) fn accumulate_aligned(acc: &mut [f32], x: &[f32], sign: f32) {
    debug_assert_eq!(acc.len(), x.len());
    for (a, v) in acc.iter_mut().zip(x.iter()) {
        *a += sign * v;
    }
}

/// Check that every row has the same, non-zero number of channels.
///
/// Returns the channel count.
pub(crate) fn check_dimensions(data: &[Vec<f32>]) -> Result<usize> {
    let first = data.first().ok_or(Error::EmptyInput)?;
    let d = first.len();
    if d == 0 {
        return Err(Error::InvalidParameter {
            name: "n_channels",
            message: "must be at least 1",
        });
    }
    for point in data.iter().skip(1) {
        if point.len() != d {
            return Err(Error::DimensionMismatch {
                expected: d,
                found: point.len(),
            });
        }
    }
    Ok(d)
}
