//! Server-side (centralized) evaluation of the global state.

use crate::aggregators::Metrics;
use crate::client::{Dataset, Model};
use crate::error::{FedError, Result};
use crate::state::ModelState;

/// Evaluates the global state once per round on data no client owns.
///
/// Returning `Ok(None)` skips recording for that round.
pub trait CentralizedEvaluator: Send + Sync {
    /// Loss and metrics of `state` after `round` (0 = initial state).
    fn evaluate(&self, round: u64, state: &ModelState) -> Result<Option<(f64, Metrics)>>;
}

impl<F> CentralizedEvaluator for F
where
    F: Fn(u64, &ModelState) -> Result<Option<(f64, Metrics)>> + Send + Sync,
{
    fn evaluate(&self, round: u64, state: &ModelState) -> Result<Option<(f64, Metrics)>> {
        self(round, state)
    }
}

/// Evaluates on a held-out dataset with a copy of a model template.
#[derive(Clone, Debug)]
pub struct HeldOutEvaluator<M: Model> {
    template: M,
    data: Dataset,
}

impl<M: Model> HeldOutEvaluator<M> {
    /// Bind the model template and held-out data.
    pub fn new(template: M, data: Dataset) -> Result<Self> {
        if data.is_empty() {
            return Err(FedError::EmptyDataset {
                cid: "server".to_string(),
            });
        }
        Ok(Self { template, data })
    }
}

impl<M: Model> CentralizedEvaluator for HeldOutEvaluator<M> {
    fn evaluate(&self, _round: u64, state: &ModelState) -> Result<Option<(f64, Metrics)>> {
        let mut model = self.template.clone();
        model.set_parameters(state)?;
        model.test(&self.data).map(Some)
    }
}
