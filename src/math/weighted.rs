//! Sample-count-weighted averaging of scalars.

use crate::error::{FedError, Result};

/// Weighted arithmetic mean `Σ n_i·x_i / Σ n_i`.
///
/// Entries are `(weight, value)` pairs, weights being sample counts.
/// Fails with [`FedError::AggregationDivideByZero`] when the weights sum
/// to zero (including the empty input) instead of returning NaN.
pub fn weighted_mean(entries: impl IntoIterator<Item = (u64, f64)>) -> Result<f64> {
    let (weighted_sum, total) = entries
        .into_iter()
        .fold((0.0f64, 0u64), |(sum, total), (n, x)| {
            (sum + n as f64 * x, total + n)
        });

    if total == 0 {
        return Err(FedError::AggregationDivideByZero);
    }
    Ok(weighted_sum / total as f64)
}
