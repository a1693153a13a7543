/// Pairwise similarity between two equally long activity vectors
pub type SimilarityFn = fn(&[f64], &[f64]) -> f64;

/// Cosine similarity
///
/// Returns 0 when either vector has zero norm. The result is clamped to
/// [-1, 1] so rounding never pushes it past the bounds.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());

    let mut ab = 0.0;
    let mut aa = 0.0;
    let mut bb = 0.0;
    for (x, y) in a.iter().zip(b) {
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }

    if aa == 0.0 || bb == 0.0 {
        return 0.0;
    }

    // For integer-valued vectors aa * bb is exact, so self-similarity hits 1.0 exactly.
    (ab / (aa * bb).sqrt()).clamp(-1.0, 1.0)
}
