//! Federated strategies.
//!
//! A [`Strategy`] decides which clients take part in a round, with which
//! configuration, and how their results are combined. The server drives
//! it through the round phases in [`RoundPhase`] order.

pub mod fedavg;
pub mod sampling;

pub use fedavg::FedAvg;
pub use sampling::{sample_size, ClientManager};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregators::Metrics;
use crate::client::{ClientProxy, EvaluateRes, FitRes};
use crate::config::RoundConfig;
use crate::error::{FedError, Result};
use crate::state::ModelState;

/// Phase of the server's round state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    /// No round has started yet
    Init,
    /// Sampling clients and building the fit configuration
    ConfigureFit,
    /// Waiting for fit results
    CollectFit,
    /// Combining updates into the new global state
    AggregateFit,
    /// Sampling clients and building the evaluate configuration
    ConfigureEvaluate,
    /// Waiting for evaluate results
    CollectEvaluate,
    /// Combining evaluation results
    AggregateEvaluate,
    /// The experiment finished or was aborted
    Terminated,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::Init => "init",
            RoundPhase::ConfigureFit => "configure_fit",
            RoundPhase::CollectFit => "collect_fit",
            RoundPhase::AggregateFit => "aggregate_fit",
            RoundPhase::ConfigureEvaluate => "configure_evaluate",
            RoundPhase::CollectEvaluate => "collect_evaluate",
            RoundPhase::AggregateEvaluate => "aggregate_evaluate",
            RoundPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Clients to contact and the single configuration they all receive.
#[derive(Clone, Debug)]
pub struct Instructions {
    /// Sampled clients
    pub clients: Vec<ClientProxy>,
    /// Shared round configuration
    pub config: RoundConfig,
}

/// Outcome of fit aggregation.
#[derive(Clone, Debug, PartialEq)]
pub struct FitAggregate {
    /// New global state
    pub parameters: ModelState,
    /// Aggregated client training metrics
    pub metrics: Metrics,
    /// Total aggregation weight
    pub num_examples: u64,
    /// Updates that entered the average
    pub num_contributors: usize,
}

/// Outcome of evaluate aggregation.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluateAggregate {
    /// Sample-weighted mean loss
    pub loss: f64,
    /// Sample-weighted metrics
    pub metrics: Metrics,
    /// Total evaluation examples
    pub num_examples: u64,
    /// Evaluations that entered the average
    pub num_contributors: usize,
}

/// The round protocol a [`Server`](crate::server::Server) drives.
pub trait Strategy: Send {
    /// Initial global state; `None` keeps the state the server was given.
    fn initialize_parameters(&mut self) -> Option<ModelState> {
        None
    }

    /// Select fit clients and their configuration for `round`.
    fn configure_fit(&mut self, round: u64, manager: &ClientManager) -> Result<Instructions>;

    /// Combine fit results into a new global state.
    ///
    /// `current` is the state that was broadcast; it defines the expected
    /// layout. Must not return a partial state.
    fn aggregate_fit(
        &self,
        round: u64,
        current: &ModelState,
        results: Vec<(ClientProxy, FitRes)>,
        failures: Vec<(ClientProxy, FedError)>,
    ) -> Result<FitAggregate>;

    /// Select evaluation clients for `round`; `None` skips distributed evaluation.
    fn configure_evaluate(
        &mut self,
        round: u64,
        manager: &ClientManager,
    ) -> Result<Option<Instructions>>;

    /// Combine evaluation results; `None` records nothing for the round.
    fn aggregate_evaluate(
        &self,
        round: u64,
        results: Vec<(ClientProxy, EvaluateRes)>,
        failures: Vec<(ClientProxy, FedError)>,
    ) -> Result<Option<EvaluateAggregate>>;

    /// Centralized evaluation of `parameters`; `None` when not configured.
    fn evaluate(&self, round: u64, parameters: &ModelState) -> Result<Option<(f64, Metrics)>>;
}
