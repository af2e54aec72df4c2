//! # fedsim: Federated Averaging Simulation Core
//!
//! Runs the federated averaging (FedAvg) protocol over simulated clients:
//! a server samples clients each round, broadcasts the global model
//! state, collects local updates in parallel and replaces the global
//! state with their sample-weighted average.
//!
//! ## Building Blocks
//!
//! - [`ModelState`] - Named parameter tensors, the unit of exchange
//! - [`fedavg()`] - Sample-weighted averaging of client updates
//! - [`Client`] / [`ModelClient`] - Local training and evaluation
//! - [`FedAvg`] - Sampling, failure policy and aggregation per round
//! - [`Server`] - Sequential round driver producing a [`History`]
//!
//! ## Quick Example
//!
//! ```rust
//! use fedsim::sim::{synthetic_classification, LogisticRegression};
//! use fedsim::{
//!     ClientManager, ClientProxy, FedAvg, FixedConfig, IidPartitioner, Model, ModelClient,
//!     Series, Server, StrategyConfig,
//! };
//!
//! let data = synthetic_classification(400, 3, 7).unwrap();
//! let partitioner = IidPartitioner::new(&data, 4, 0.2, 7).unwrap();
//!
//! let mut manager = ClientManager::new();
//! for cid in 0..4 {
//!     let client = ModelClient::from_partitioner(
//!         cid.to_string(),
//!         LogisticRegression::new(3),
//!         &partitioner,
//!         cid as u64,
//!     )
//!     .unwrap();
//!     manager.register(ClientProxy::new(cid.to_string(), client));
//! }
//!
//! let schedule = FixedConfig::new(1, 0.1).unwrap();
//! let strategy = FedAvg::new(StrategyConfig::default(), schedule).unwrap();
//! let initial = LogisticRegression::new(3).get_parameters();
//! let mut server = Server::new(manager, strategy, initial, 2).unwrap();
//!
//! let history = server.run(3).unwrap();
//! assert_eq!(history.losses(Series::Distributed).len(), 3);
//! ```

#![deny(missing_docs)]

pub mod aggregators;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod math;
pub mod server;
pub mod sim;
pub mod state;
pub mod strategy;

// Re-exports
pub use aggregators::fedavg;
pub use aggregators::{
    weighted_loss, weighted_metrics, FedAvgAccumulator, Metrics, MetricsAggregator,
};
pub use client::{
    Client, ClientProxy, Dataset, EvaluateRes, FitRes, IidPartitioner, Model, ModelClient,
    Partitioner,
};
pub use config::{
    ConfigProvider, FixedConfig, RoundConfig, SimulationConfig, StepDecay, StrategyConfig,
};
pub use error::FedError;
pub use evaluation::{CentralizedEvaluator, HeldOutEvaluator};
pub use history::{History, HistorySink, JsonLinesSink, RoundSummary, Series};
pub use server::Server;
pub use state::ModelState;
pub use strategy::{ClientManager, FedAvg, RoundPhase, Strategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
