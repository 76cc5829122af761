//! Similarity kernels shared by the feature drivers.
//!
//! All kernels return higher values for more similar inputs and are
//! symmetric in their arguments.

/// Histogram intersection: `sum(min(a[i], b[i]))`.
///
/// For L1-normalised histograms the range is [0, 1] and identical inputs
/// score 1.
#[inline]
pub fn histogram_intersection(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "histogram lengths must match");
    a.iter().zip(b.iter()).map(|(x, y)| x.min(*y)).sum()
}

/// Dot product (inner product).
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in [-1, 1]; 0 when either vector is zero.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let denominator = norm_a * norm_b;
    if denominator == 0.0 {
        return 0.0;
    }

    (dot / denominator).clamp(-1.0, 1.0)
}

/// Scales a histogram in place so its bins sum to 1. Empty histograms are
/// left untouched.
pub fn l1_normalize(hist: &mut [f32]) {
    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        for v in hist.iter_mut() {
            *v /= total;
        }
    }
}
