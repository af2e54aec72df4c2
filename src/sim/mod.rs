//! Minimal simulation harness.
//!
//! Seeded synthetic data and a logistic-regression [`Model`](crate::client::Model)
//! so the protocol can run end to end without an ML framework.

pub mod logistic;

pub use logistic::LogisticRegression;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::client::Dataset;
use crate::error::Result;

/// Linearly separable binary classification data.
///
/// Features are uniform in `[-1, 1]`; labels come from a hidden random
/// hyperplane. The same `seed` always yields the same dataset.
pub fn synthetic_classification(num_examples: usize, dim: usize, seed: u64) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let true_weight: Array1<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let true_bias: f32 = rng.gen_range(-0.2..0.2);

    let features = Array2::from_shape_fn((num_examples, dim), |_| rng.gen_range(-1.0f32..1.0));
    let labels = features
        .rows()
        .into_iter()
        .map(|x| if x.dot(&true_weight) + true_bias > 0.0 { 1.0 } else { 0.0 })
        .collect::<Array1<f32>>();

    Dataset::new(features, labels)
}
