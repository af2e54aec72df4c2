//! Norm computations over tensor elements.
//!
//! Used to report how far the global state moved during a round.

/// Compute the L2 (Euclidean) norm of a sequence of values.
pub fn l2_norm<'a>(values: impl IntoIterator<Item = &'a f32>) -> f32 {
    l2_norm_sq(values).sqrt()
}

/// Compute the squared L2 norm (avoids sqrt).
pub fn l2_norm_sq<'a>(values: impl IntoIterator<Item = &'a f32>) -> f32 {
    values.into_iter().map(|x| x * x).sum()
}
