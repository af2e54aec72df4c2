//! Aggregation rules for federated learning.
//!
//! | Rule | Combines | Weighting |
//! |------|----------|-----------|
//! | [`fedavg`] | parameter tensors | sample count |
//! | [`weighted_metrics`] | scalar metrics | sample count |
//! | [`weighted_loss`] | scalar losses | sample count |

pub mod fedavg;
pub mod metrics;

pub use fedavg::{fedavg, FedAvgAccumulator};
pub use metrics::{weighted_loss, weighted_metrics, Metrics, MetricsAggregator, WeightedAverage};
