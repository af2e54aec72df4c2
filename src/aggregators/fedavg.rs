//! FedAvg aggregation over named parameter tensors
//!
//! Federated averaging as described by McMahan et al. (2017): the new
//! global value of every parameter is the sample-count-weighted mean of
//! the client values. Sums are accumulated in `f64` so that the result
//! does not depend on contributor order beyond rounding of the final cast.

use std::collections::BTreeMap;

use ndarray::ArrayD;
use rayon::prelude::*;

use crate::error::{FedError, Result};
use crate::state::ModelState;

/// Running sample-weighted sum of client updates.
///
/// Every update is validated against the reference layout before it is
/// added, so a rejected update leaves the running sum untouched.
pub struct FedAvgAccumulator {
    layout: ModelState,
    sums: BTreeMap<String, ArrayD<f64>>,
    total_weight: u64,
    contributors: usize,
}

impl FedAvgAccumulator {
    /// Create an accumulator whose expected layout is that of `reference`.
    pub fn new(reference: &ModelState) -> Self {
        let sums = reference
            .iter()
            .map(|(k, t)| (k.clone(), ArrayD::zeros(t.raw_dim())))
            .collect();
        Self {
            layout: reference.zeros_like(),
            sums,
            total_weight: 0,
            contributors: 0,
        }
    }

    /// Add `update` with weight `n` (its sample count).
    ///
    /// A zero weight is accepted and contributes nothing.
    pub fn add(&mut self, update: &ModelState, n: u64) -> Result<()> {
        self.layout.check_compatible(update)?;

        let weight = n as f64;
        self.sums.par_iter_mut().for_each(|(key, sum)| {
            if let Some(tensor) = update.get(key) {
                sum.zip_mut_with(tensor, |s, &x| *s += weight * x as f64);
            }
        });
        self.total_weight += n;
        self.contributors += 1;
        Ok(())
    }

    /// Number of updates added so far.
    pub fn contributors(&self) -> usize {
        self.contributors
    }

    /// Sum of the weights added so far.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Divide the running sum by the total weight.
    pub fn finish(self) -> Result<ModelState> {
        if self.contributors == 0 {
            return Err(FedError::NoUpdates);
        }
        if self.total_weight == 0 {
            return Err(FedError::AggregationDivideByZero);
        }
        let total = self.total_weight as f64;
        Ok(self
            .sums
            .into_par_iter()
            .map(|(key, sum)| (key, sum.mapv(|s| (s / total) as f32)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect())
    }
}

/// Sample-count-weighted FedAvg over client updates.
///
/// Computes `global'[k] = Σ n_i·θ_i[k] / Σ n_i` for every parameter `k`.
/// The first update defines the expected layout.
///
/// # Arguments
///
/// * `updates` - `(local_state, sample_count)` per contributing client
///
/// # Errors
///
/// * [`FedError::NoUpdates`] when `updates` is empty
/// * [`FedError::AggregationDivideByZero`] when every sample count is zero
/// * [`FedError::ShapeMismatch`] (or a key-set error) on inconsistent layouts
///
/// # Example
///
/// ```rust
/// use fedsim::{fedavg, ModelState};
/// use ndarray::array;
///
/// let mut a = ModelState::new();
/// a.insert("w", array![1.0f32, 2.0].into_dyn());
/// let mut b = ModelState::new();
/// b.insert("w", array![3.0f32, 6.0].into_dyn());
///
/// // (1*1 + 3*3) / 4 = 2.5, (1*2 + 3*6) / 4 = 5.0
/// let global = fedavg(&[(&a, 1), (&b, 3)]).unwrap();
/// assert!((global.get("w").unwrap()[0] - 2.5).abs() < 1e-6);
/// assert!((global.get("w").unwrap()[1] - 5.0).abs() < 1e-6);
/// ```
pub fn fedavg(updates: &[(&ModelState, u64)]) -> Result<ModelState> {
    let (reference, _) = updates.first().ok_or(FedError::NoUpdates)?;

    let mut acc = FedAvgAccumulator::new(reference);
    for (update, n) in updates {
        acc.add(update, *n)?;
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn state(w: ArrayD<f32>) -> ModelState {
        let mut s = ModelState::new();
        s.insert("w", w);
        s
    }

    #[test]
    fn test_fedavg_equal_weights_is_mean() {
        let a = state(array![[1.0, 2.0]].into_dyn());
        let b = state(array![[3.0, 4.0]].into_dyn());
        let result = fedavg(&[(&a, 1), (&b, 1)]).unwrap();
        let w = result.get("w").unwrap();
        assert!((w[[0, 0]] - 2.0).abs() < 1e-6);
        assert!((w[[0, 1]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fedavg_weighted() {
        let a = state(array![1.0].into_dyn());
        let b = state(array![3.0].into_dyn());
        // (1*1 + 3*3) / 4 = 2.5
        let result = fedavg(&[(&a, 1), (&b, 3)]).unwrap();
        assert!((result.get("w").unwrap()[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_fedavg_single_client_unchanged() {
        let a = state(array![[42.0, 7.0], [-1.5, 0.25]].into_dyn());
        let result = fedavg(&[(&a, 5)]).unwrap();
        assert_eq!(result, a);
    }

    #[test]
    fn test_fedavg_empty() {
        assert!(matches!(fedavg(&[]), Err(FedError::NoUpdates)));
    }

    #[test]
    fn test_fedavg_zero_total_weight() {
        let a = state(array![1.0].into_dyn());
        assert!(matches!(
            fedavg(&[(&a, 0), (&a, 0)]),
            Err(FedError::AggregationDivideByZero)
        ));
    }

    #[test]
    fn test_fedavg_shape_mismatch() {
        let a = state(array![1.0, 2.0].into_dyn());
        let b = state(array![1.0].into_dyn());
        assert!(matches!(
            fedavg(&[(&a, 1), (&b, 1)]),
            Err(FedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejected_update_leaves_sum_intact() {
        let a = state(array![2.0, 4.0].into_dyn());
        let bad = state(array![[100.0, 100.0]].into_dyn());
        let b = state(array![4.0, 8.0].into_dyn());

        let mut acc = FedAvgAccumulator::new(&a);
        acc.add(&a, 1).unwrap();
        assert!(acc.add(&bad, 10).is_err());
        acc.add(&b, 1).unwrap();
        assert_eq!(acc.contributors(), 2);
        assert_eq!(acc.total_weight(), 2);

        let result = acc.finish().unwrap();
        let w = result.get("w").unwrap();
        assert!((w[0] - 3.0).abs() < 1e-6);
        assert!((w[1] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_weight_contributor_ignored() {
        let a = state(array![1.0].into_dyn());
        let b = state(array![100.0].into_dyn());
        let result = fedavg(&[(&a, 4), (&b, 0)]).unwrap();
        assert!((result.get("w").unwrap()[0] - 1.0).abs() < 1e-6);
    }
}
