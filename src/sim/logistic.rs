//! Binary logistic regression trained with per-example SGD.

use ndarray::{Array1, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::aggregators::Metrics;
use crate::client::{Dataset, Model, TrainReport};
use crate::config::RoundConfig;
use crate::error::Result;
use crate::state::ModelState;

const WEIGHT_KEY: &str = "linear.weight";
const BIAS_KEY: &str = "linear.bias";

/// Clamp for probabilities inside the log loss.
const EPS: f32 = 1e-7;

/// `p(y = 1 | x) = sigmoid(w·x + b)`.
#[derive(Clone, Debug, PartialEq)]
pub struct LogisticRegression {
    weight: Array1<f32>,
    bias: f32,
}

impl LogisticRegression {
    /// A zero-initialised model over `dim` features.
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Array1::zeros(dim),
            bias: 0.0,
        }
    }

    fn predict(&self, x: ndarray::ArrayView1<'_, f32>) -> f32 {
        sigmoid(x.dot(&self.weight) + self.bias)
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

fn log_loss(p: f32, y: f32) -> f32 {
    let p = p.clamp(EPS, 1.0 - EPS);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

impl Model for LogisticRegression {
    fn get_parameters(&self) -> ModelState {
        let mut state = ModelState::new();
        state.insert(WEIGHT_KEY, self.weight.clone().into_dyn());
        state.insert(BIAS_KEY, ArrayD::from_elem(IxDyn(&[1]), self.bias));
        state
    }

    fn set_parameters(&mut self, state: &ModelState) -> Result<()> {
        self.get_parameters().check_compatible(state)?;
        if let (Some(weight), Some(bias)) = (state.get(WEIGHT_KEY), state.get(BIAS_KEY)) {
            self.weight = weight.iter().copied().collect();
            self.bias = bias.iter().copied().next().unwrap_or(0.0);
        }
        Ok(())
    }

    fn train(
        &mut self,
        data: &Dataset,
        config: &RoundConfig,
        rng: &mut StdRng,
    ) -> Result<TrainReport> {
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut epoch_loss = 0.0f32;

        for _ in 0..config.epochs {
            order.shuffle(rng);
            epoch_loss = 0.0;
            for &i in &order {
                let (x, y) = data.example(i);
                let p = self.predict(x);
                epoch_loss += log_loss(p, y);

                let grad = p - y;
                self.weight.scaled_add(-config.lr * grad, &x);
                self.bias -= config.lr * grad;
            }
        }

        let mut metrics = Metrics::new();
        if !data.is_empty() {
            metrics.insert("train_loss".to_string(), (epoch_loss / data.len() as f32) as f64);
        }
        Ok(TrainReport {
            num_examples: data.len() as u64,
            metrics,
        })
    }

    fn test(&self, data: &Dataset) -> Result<(f64, Metrics)> {
        let mut metrics = Metrics::new();
        if data.is_empty() {
            return Ok((0.0, metrics));
        }

        let (loss, correct) = data.iter().fold((0.0f32, 0usize), |(loss, correct), (x, y)| {
            let p = self.predict(x);
            let hit = (p >= 0.5) == (y >= 0.5);
            (loss + log_loss(p, y), correct + hit as usize)
        });
        let n = data.len() as f64;
        metrics.insert("accuracy".to_string(), correct as f64 / n);
        Ok((loss as f64 / n, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FedError;
    use crate::sim::synthetic_classification;
    use rand::SeedableRng;

    #[test]
    fn test_parameter_layout() {
        let m = LogisticRegression::new(5);
        let state = m.get_parameters();
        assert_eq!(state.shapes()[WEIGHT_KEY], vec![5]);
        assert_eq!(state.shapes()[BIAS_KEY], vec![1]);
        assert_eq!(state.num_params(), 6);
    }

    #[test]
    fn test_set_parameters_roundtrip_and_mismatch() {
        let mut m = LogisticRegression::new(2);
        let mut state = m.get_parameters();
        state.insert(WEIGHT_KEY, ndarray::array![0.5f32, -0.5].into_dyn());
        m.set_parameters(&state).unwrap();
        assert_eq!(m.get_parameters(), state);

        let wrong = LogisticRegression::new(3).get_parameters();
        assert!(matches!(
            m.set_parameters(&wrong),
            Err(FedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_training_reduces_loss() {
        let data = synthetic_classification(200, 3, 21).unwrap();
        let mut m = LogisticRegression::new(3);
        let (before, _) = m.test(&data).unwrap();

        let config = RoundConfig::new(1, 5, 0.1).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let report = m.train(&data, &config, &mut rng).unwrap();
        let (after, metrics) = m.test(&data).unwrap();

        assert_eq!(report.num_examples, 200);
        assert!(after < before, "loss {} -> {}", before, after);
        assert!(metrics["accuracy"] > 0.8);
    }

    #[test]
    fn test_test_does_not_mutate() {
        let data = synthetic_classification(20, 2, 1).unwrap();
        let m = LogisticRegression::new(2);
        let snapshot = m.clone();
        let _ = m.test(&data).unwrap();
        assert_eq!(m, snapshot);
    }
}
