//! Model abstraction and the standard model-backed client.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::data::{Dataset, Partitioner};
use super::{Client, EvaluateRes, FitRes};
use crate::aggregators::Metrics;
use crate::config::RoundConfig;
use crate::error::{FedError, Result};
use crate::state::ModelState;

/// Outcome of a local training pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainReport {
    /// Distinct training examples the model was fitted on
    pub num_examples: u64,
    /// Training metrics such as the final epoch loss
    pub metrics: Metrics,
}

/// A trainable model that converts to and from [`ModelState`].
///
/// `Clone` gives each client its own local copy.
pub trait Model: Clone + Send + Sync {
    /// Current parameters.
    fn get_parameters(&self) -> ModelState;

    /// Load `state`; fails if its layout differs from the model's.
    fn set_parameters(&mut self, state: &ModelState) -> Result<()>;

    /// Train on `data` for `config.epochs` epochs.
    fn train(
        &mut self,
        data: &Dataset,
        config: &RoundConfig,
        rng: &mut StdRng,
    ) -> Result<TrainReport>;

    /// Loss and metrics on `data`. Must not change the parameters.
    fn test(&self, data: &Dataset) -> Result<(f64, Metrics)>;
}

/// A [`Client`] backed by a model template and a private data partition.
#[derive(Clone, Debug)]
pub struct ModelClient<M: Model> {
    cid: String,
    template: M,
    train: Dataset,
    valid: Dataset,
    seed: u64,
}

impl<M: Model> ModelClient<M> {
    /// Create a client from explicit partitions.
    pub fn new(
        cid: impl Into<String>,
        template: M,
        train: Dataset,
        valid: Dataset,
        seed: u64,
    ) -> Self {
        Self {
            cid: cid.into(),
            template,
            train,
            valid,
            seed,
        }
    }

    /// Create a client whose data comes from `partitioner`.
    pub fn from_partitioner(
        cid: impl Into<String>,
        template: M,
        partitioner: &dyn Partitioner,
        seed: u64,
    ) -> Result<Self> {
        let cid = cid.into();
        let (train, valid) = partitioner.partition(&cid)?;
        Ok(Self::new(cid, template, train, valid, seed))
    }

    /// Client identifier.
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// A fresh local copy of the model holding `global`.
    fn local_model(&self, global: &ModelState) -> Result<M> {
        self.template.get_parameters().check_compatible(global)?;
        let mut model = self.template.clone();
        model.set_parameters(global)?;
        Ok(model)
    }

    fn round_rng(&self, round: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ round.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl<M: Model> Client for ModelClient<M> {
    fn fit(&self, parameters: &ModelState, config: &RoundConfig) -> Result<FitRes> {
        if self.train.is_empty() {
            return Err(FedError::EmptyDataset {
                cid: self.cid.clone(),
            });
        }

        let mut model = self.local_model(parameters)?;
        let mut rng = self.round_rng(config.server_round);
        let report = model.train(&self.train, config, &mut rng)?;
        if report.num_examples == 0 {
            return Err(FedError::EmptyDataset {
                cid: self.cid.clone(),
            });
        }

        let updated = model.get_parameters();
        debug!(
            cid = %self.cid,
            round = config.server_round,
            num_examples = report.num_examples,
            param_norm = updated.l2_norm(),
            "local fit finished"
        );
        Ok(FitRes {
            parameters: updated,
            num_examples: report.num_examples,
            metrics: report.metrics,
        })
    }

    fn evaluate(&self, parameters: &ModelState, config: &RoundConfig) -> Result<EvaluateRes> {
        if self.valid.is_empty() {
            return Err(FedError::EmptyDataset {
                cid: self.cid.clone(),
            });
        }

        let model = self.local_model(parameters)?;
        let (loss, metrics) = model.test(&self.valid)?;
        debug!(cid = %self.cid, round = config.server_round, loss, "local evaluate finished");
        Ok(EvaluateRes {
            loss,
            num_examples: self.valid.len() as u64,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{synthetic_classification, LogisticRegression};

    fn client(n_train: usize, n_valid: usize) -> ModelClient<LogisticRegression> {
        let data = synthetic_classification(n_train + n_valid, 3, 11).unwrap();
        let train: Vec<usize> = (0..n_train).collect();
        let valid: Vec<usize> = (n_train..n_train + n_valid).collect();
        ModelClient::new(
            "0",
            LogisticRegression::new(3),
            data.select(&train),
            data.select(&valid),
            5,
        )
    }

    #[test]
    fn test_fit_reports_sample_count_and_keeps_global() {
        let c = client(40, 10);
        let global = LogisticRegression::new(3).get_parameters();
        let before = global.clone();
        let config = RoundConfig::new(1, 2, 0.1).unwrap();

        let res = c.fit(&global, &config).unwrap();
        assert_eq!(res.num_examples, 40);
        assert_eq!(global, before);
        assert_ne!(res.parameters, global);
        assert!(global.check_compatible(&res.parameters).is_ok());
    }

    #[test]
    fn test_fit_is_reproducible() {
        let c = client(40, 10);
        let global = LogisticRegression::new(3).get_parameters();
        let config = RoundConfig::new(3, 1, 0.1).unwrap();
        assert_eq!(c.fit(&global, &config).unwrap(), c.fit(&global, &config).unwrap());
    }

    #[test]
    fn test_fit_rejects_wrong_layout() {
        let c = client(10, 2);
        let wrong = LogisticRegression::new(4).get_parameters();
        let config = RoundConfig::new(1, 1, 0.1).unwrap();
        assert!(matches!(
            c.fit(&wrong, &config),
            Err(FedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_partitions() {
        let c = client(0, 0);
        let global = LogisticRegression::new(3).get_parameters();
        let config = RoundConfig::new(1, 1, 0.1).unwrap();
        assert!(matches!(
            c.fit(&global, &config),
            Err(FedError::EmptyDataset { .. })
        ));
        assert!(matches!(
            c.evaluate(&global, &config),
            Err(FedError::EmptyDataset { .. })
        ));
    }

    #[test]
    fn test_evaluate_counts_validation_examples() {
        let c = client(20, 8);
        let global = LogisticRegression::new(3).get_parameters();
        let config = RoundConfig::new(1, 1, 0.1).unwrap();
        let res = c.evaluate(&global, &config).unwrap();
        assert_eq!(res.num_examples, 8);
        assert!(res.metrics.contains_key("accuracy"));
    }

    #[test]
    fn test_partitioned_client_behind_shared_proxies() {
        use crate::client::{ClientProxy, IidPartitioner};
        use std::sync::Arc;

        let data = synthetic_classification(60, 3, 2).unwrap();
        let partitioner = IidPartitioner::new(&data, 3, 0.2, 2).unwrap();
        let c = ModelClient::from_partitioner("1", LogisticRegression::new(3), &partitioner, 9)
            .unwrap();
        assert_eq!(c.cid(), "1");
        assert!(
            ModelClient::from_partitioner("7", LogisticRegression::new(3), &partitioner, 9)
                .is_err()
        );

        let shared: Arc<dyn Client> = Arc::new(c);
        let primary = ClientProxy::from_arc("1", Arc::clone(&shared));
        let replica = ClientProxy::from_arc("1-replica", shared);
        let global = LogisticRegression::new(3).get_parameters();
        let config = RoundConfig::new(2, 1, 0.1).unwrap();
        assert_eq!(
            primary.fit(&global, &config).unwrap(),
            replica.fit(&global, &config).unwrap()
        );
        assert_eq!(format!("{:?}", replica), "ClientProxy { cid: \"1-replica\" }");
    }
}
