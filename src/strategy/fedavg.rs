//! Federated averaging strategy.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use super::sampling::{sample_size, ClientManager};
use super::{EvaluateAggregate, FitAggregate, Instructions, Strategy};
use crate::aggregators::{
    weighted_loss, FedAvgAccumulator, Metrics, MetricsAggregator, WeightedAverage,
};
use crate::client::{ClientProxy, EvaluateRes, FitRes};
use crate::config::{ConfigProvider, StrategyConfig};
use crate::error::{FedError, Result};
use crate::evaluation::CentralizedEvaluator;
use crate::state::ModelState;

/// FedAvg: sample-weighted averaging of client updates and metrics.
///
/// Client sampling is seeded from [`StrategyConfig::seed`]; fit and
/// evaluate samples are independent draws from the same generator.
pub struct FedAvg {
    config: StrategyConfig,
    fit_config: Box<dyn ConfigProvider>,
    evaluate_config: Option<Box<dyn ConfigProvider>>,
    centralized: Option<Box<dyn CentralizedEvaluator>>,
    fit_metrics: Box<dyn MetricsAggregator>,
    evaluate_metrics: Box<dyn MetricsAggregator>,
    initial: Option<ModelState>,
    rng: StdRng,
}

impl FedAvg {
    /// Create a strategy; `fit_config` supplies each round's hyperparameters.
    pub fn new(config: StrategyConfig, fit_config: impl ConfigProvider + 'static) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            fit_config: Box::new(fit_config),
            evaluate_config: None,
            centralized: None,
            fit_metrics: Box::new(WeightedAverage),
            evaluate_metrics: Box::new(WeightedAverage),
            initial: None,
            rng,
        })
    }

    /// Use a separate configuration provider for evaluation rounds.
    pub fn with_evaluate_config(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.evaluate_config = Some(Box::new(provider));
        self
    }

    /// Evaluate every new global state on the server as well.
    pub fn with_centralized_evaluator(
        mut self,
        evaluator: impl CentralizedEvaluator + 'static,
    ) -> Self {
        self.centralized = Some(Box::new(evaluator));
        self
    }

    /// Replace the rule combining client fit metrics.
    pub fn with_fit_metrics_aggregator(
        mut self,
        aggregator: impl MetricsAggregator + 'static,
    ) -> Self {
        self.fit_metrics = Box::new(aggregator);
        self
    }

    /// Replace the rule combining client evaluation metrics.
    pub fn with_evaluate_metrics_aggregator(
        mut self,
        aggregator: impl MetricsAggregator + 'static,
    ) -> Self {
        self.evaluate_metrics = Box::new(aggregator);
        self
    }

    /// Start the experiment from `parameters` instead of the server's state.
    pub fn with_initial_parameters(mut self, parameters: ModelState) -> Self {
        self.initial = Some(parameters);
        self
    }

    /// Sampling and failure policy.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Fit sample size for a pool of `available` clients.
    pub fn num_fit_clients(&self, available: usize) -> usize {
        sample_size(available, self.config.fraction_fit, self.config.min_fit_clients)
    }

    /// Evaluate sample size for a pool of `available` clients.
    pub fn num_evaluate_clients(&self, available: usize) -> usize {
        sample_size(
            available,
            self.config.fraction_evaluate,
            self.config.min_evaluate_clients,
        )
    }

    /// Move zero-sample results into the failure list.
    fn drop_empty<T>(
        results: Vec<(ClientProxy, T)>,
        failures: &mut Vec<(ClientProxy, FedError)>,
        num_examples: impl Fn(&T) -> u64,
    ) -> Vec<(ClientProxy, T)> {
        let mut kept = Vec::with_capacity(results.len());
        for (proxy, res) in results {
            if num_examples(&res) == 0 {
                let cid = proxy.cid().to_string();
                failures.push((proxy, FedError::EmptyDataset { cid }));
            } else {
                kept.push((proxy, res));
            }
        }
        kept
    }
}

impl Strategy for FedAvg {
    fn initialize_parameters(&mut self) -> Option<ModelState> {
        self.initial.take()
    }

    fn configure_fit(&mut self, round: u64, manager: &ClientManager) -> Result<Instructions> {
        let num = self.num_fit_clients(manager.num_available());
        let clients = manager.sample(num, self.config.min_available_clients, &mut self.rng)?;
        debug!(round, sampled = clients.len(), "configured fit");
        Ok(Instructions {
            clients,
            config: self.fit_config.config_for_round(round),
        })
    }

    fn aggregate_fit(
        &self,
        round: u64,
        current: &ModelState,
        results: Vec<(ClientProxy, FitRes)>,
        mut failures: Vec<(ClientProxy, FedError)>,
    ) -> Result<FitAggregate> {
        let results = Self::drop_empty(results, &mut failures, |r: &FitRes| r.num_examples);

        for (proxy, err) in &failures {
            warn!(round, cid = %proxy.cid(), error = %err, "client dropped from fit");
        }
        if !failures.is_empty() && !self.config.accept_failures {
            return Err(FedError::ClientFailures {
                round,
                failures: failures.len(),
            });
        }
        if results.is_empty() {
            return Err(FedError::NoUpdates);
        }

        let mut acc = FedAvgAccumulator::new(current);
        for (proxy, res) in &results {
            acc.add(&res.parameters, res.num_examples).map_err(|e| {
                warn!(round, cid = %proxy.cid(), error = %e, "incompatible client update");
                e
            })?;
        }
        let num_examples = acc.total_weight();
        let num_contributors = acc.contributors();
        let parameters = acc.finish()?;

        let reported: Vec<(u64, &Metrics)> = results
            .iter()
            .map(|(_, r)| (r.num_examples, &r.metrics))
            .collect();
        let metrics = self.fit_metrics.aggregate(&reported);

        Ok(FitAggregate {
            parameters,
            metrics,
            num_examples,
            num_contributors,
        })
    }

    fn configure_evaluate(
        &mut self,
        round: u64,
        manager: &ClientManager,
    ) -> Result<Option<Instructions>> {
        if self.config.fraction_evaluate == 0.0 {
            return Ok(None);
        }
        let available = manager.num_available();
        let num = self.num_evaluate_clients(available);
        let needed = num.max(self.config.min_available_clients);
        if available < needed {
            warn!(round, needed, available, "too few clients, skipping distributed evaluation");
            return Ok(None);
        }
        let clients = manager.sample(num, self.config.min_available_clients, &mut self.rng)?;
        let provider = self.evaluate_config.as_ref().unwrap_or(&self.fit_config);
        debug!(round, sampled = clients.len(), "configured evaluate");
        Ok(Some(Instructions {
            clients,
            config: provider.config_for_round(round),
        }))
    }

    fn aggregate_evaluate(
        &self,
        round: u64,
        results: Vec<(ClientProxy, EvaluateRes)>,
        mut failures: Vec<(ClientProxy, FedError)>,
    ) -> Result<Option<EvaluateAggregate>> {
        let results = Self::drop_empty(results, &mut failures, |r: &EvaluateRes| r.num_examples);

        for (proxy, err) in &failures {
            warn!(round, cid = %proxy.cid(), error = %err, "client dropped from evaluate");
        }
        if results.is_empty() || (!failures.is_empty() && !self.config.accept_failures) {
            return Ok(None);
        }

        let losses: Vec<(u64, f64)> = results
            .iter()
            .map(|(_, r)| (r.num_examples, r.loss))
            .collect();
        let loss = weighted_loss(&losses)?;

        let reported: Vec<(u64, &Metrics)> = results
            .iter()
            .map(|(_, r)| (r.num_examples, &r.metrics))
            .collect();

        Ok(Some(EvaluateAggregate {
            loss,
            metrics: self.evaluate_metrics.aggregate(&reported),
            num_examples: losses.iter().map(|(n, _)| n).sum(),
            num_contributors: results.len(),
        }))
    }

    fn evaluate(&self, round: u64, parameters: &ModelState) -> Result<Option<(f64, Metrics)>> {
        match &self.centralized {
            Some(evaluator) => evaluator.evaluate(round, parameters),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::{FixedConfig, RoundConfig};
    use ndarray::array;

    struct Idle;

    impl Client for Idle {
        fn fit(&self, _: &ModelState, _: &RoundConfig) -> Result<FitRes> {
            Err(FedError::NoUpdates)
        }

        fn evaluate(&self, _: &ModelState, _: &RoundConfig) -> Result<EvaluateRes> {
            Err(FedError::NoUpdates)
        }
    }

    fn proxy(cid: &str) -> ClientProxy {
        ClientProxy::new(cid, Idle)
    }

    fn state(v: f32) -> ModelState {
        let mut s = ModelState::new();
        s.insert("w", array![v, v].into_dyn());
        s
    }

    fn fit_res(v: f32, n: u64, acc: f64) -> FitRes {
        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), acc);
        FitRes {
            parameters: state(v),
            num_examples: n,
            metrics,
        }
    }

    fn strategy(config: StrategyConfig) -> FedAvg {
        FedAvg::new(config, FixedConfig::new(1, 0.1).unwrap()).unwrap()
    }

    #[test]
    fn test_aggregate_fit_weighted() {
        let s = strategy(StrategyConfig::default());
        let results = vec![
            (proxy("a"), fit_res(1.0, 10, 0.8)),
            (proxy("b"), fit_res(5.0, 30, 0.6)),
        ];
        let agg = s.aggregate_fit(1, &state(0.0), results, vec![]).unwrap();
        // (10*1 + 30*5) / 40 = 4.0
        assert!((agg.parameters.get("w").unwrap()[0] - 4.0).abs() < 1e-6);
        assert!((agg.metrics["accuracy"] - 0.65).abs() < 1e-12);
        assert_eq!(agg.num_examples, 40);
        assert_eq!(agg.num_contributors, 2);
    }

    #[test]
    fn test_aggregate_fit_drops_failures_and_empty() {
        let s = strategy(StrategyConfig::default());
        let results = vec![
            (proxy("a"), fit_res(2.0, 4, 0.5)),
            (proxy("b"), fit_res(100.0, 0, 0.0)),
        ];
        let failures = vec![(proxy("c"), FedError::ClientPanic("boom".to_string()))];
        let agg = s.aggregate_fit(1, &state(0.0), results, failures).unwrap();
        assert_eq!(agg.num_contributors, 1);
        assert_eq!(agg.parameters, state(2.0));
    }

    #[test]
    fn test_aggregate_fit_no_updates() {
        let s = strategy(StrategyConfig::default());
        let failures = vec![(proxy("a"), FedError::ClientPanic("boom".to_string()))];
        assert!(matches!(
            s.aggregate_fit(1, &state(0.0), vec![], failures),
            Err(FedError::NoUpdates)
        ));
    }

    #[test]
    fn test_aggregate_fit_rejects_failures_when_configured() {
        let s = strategy(StrategyConfig {
            accept_failures: false,
            ..Default::default()
        });
        let results = vec![(proxy("a"), fit_res(2.0, 4, 0.5))];
        let failures = vec![(proxy("b"), FedError::ClientPanic("boom".to_string()))];
        assert!(matches!(
            s.aggregate_fit(3, &state(0.0), results, failures),
            Err(FedError::ClientFailures { round: 3, failures: 1 })
        ));
    }

    #[test]
    fn test_aggregate_fit_shape_mismatch() {
        let s = strategy(StrategyConfig::default());
        let mut bad = fit_res(1.0, 3, 0.5);
        bad.parameters.insert("w", array![1.0f32].into_dyn());
        let results = vec![(proxy("a"), fit_res(1.0, 3, 0.5)), (proxy("b"), bad)];
        assert!(matches!(
            s.aggregate_fit(1, &state(0.0), results, vec![]),
            Err(FedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_aggregate_evaluate() {
        let s = strategy(StrategyConfig::default());
        let eval = |loss: f64, n: u64, acc: f64| {
            let mut metrics = Metrics::new();
            metrics.insert("accuracy".to_string(), acc);
            EvaluateRes {
                loss,
                num_examples: n,
                metrics,
            }
        };
        let results = vec![
            (proxy("a"), eval(1.0, 10, 0.8)),
            (proxy("b"), eval(2.0, 30, 0.6)),
        ];
        let agg = s.aggregate_evaluate(1, results, vec![]).unwrap().unwrap();
        assert!((agg.loss - 1.75).abs() < 1e-12);
        assert!((agg.metrics["accuracy"] - 0.65).abs() < 1e-12);
        assert_eq!(agg.num_examples, 40);

        assert!(s.aggregate_evaluate(2, vec![], vec![]).unwrap().is_none());
    }

    #[test]
    fn test_configure_fit_sample_size() {
        let mut s = strategy(StrategyConfig {
            fraction_fit: 0.3,
            ..Default::default()
        });
        let mut manager = ClientManager::new();
        for i in 0..10 {
            manager.register(proxy(&i.to_string()));
        }
        let ins = s.configure_fit(2, &manager).unwrap();
        assert_eq!(ins.clients.len(), 3);
        assert_eq!(ins.config.server_round, 2);
    }

    #[test]
    fn test_initial_parameters_handed_out_once() {
        let mut s = strategy(StrategyConfig::default()).with_initial_parameters(state(3.0));
        assert_eq!(s.initialize_parameters(), Some(state(3.0)));
        assert_eq!(s.initialize_parameters(), None);
    }

    #[test]
    fn test_configure_evaluate_disabled() {
        let mut s = strategy(StrategyConfig {
            fraction_evaluate: 0.0,
            ..Default::default()
        });
        let mut manager = ClientManager::new();
        manager.register(proxy("0"));
        assert!(s.configure_evaluate(1, &manager).unwrap().is_none());
    }

    #[test]
    fn test_configure_evaluate_skips_undersized_pool() {
        let mut s = strategy(StrategyConfig {
            min_evaluate_clients: 4,
            min_available_clients: 4,
            ..Default::default()
        });
        let mut manager = ClientManager::new();
        for i in 0..4 {
            manager.register(proxy(&i.to_string()));
        }
        assert_eq!(s.configure_evaluate(1, &manager).unwrap().unwrap().clients.len(), 4);

        manager.set_available("3", false);
        assert!(s.configure_evaluate(2, &manager).unwrap().is_none());
    }

    #[test]
    fn test_min_available_clients_enforced() {
        let mut s = strategy(StrategyConfig {
            min_available_clients: 5,
            ..Default::default()
        });
        let mut manager = ClientManager::new();
        manager.register(proxy("0"));
        assert!(matches!(
            s.configure_fit(1, &manager),
            Err(FedError::InsufficientClients { needed: 5, available: 1 })
        ));
    }
}
