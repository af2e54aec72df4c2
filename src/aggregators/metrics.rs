//! Sample-weighted aggregation of scalar losses and metrics.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::math::weighted::weighted_mean;

/// Client-reported scalar metrics, keyed by name.
pub type Metrics = BTreeMap<String, f64>;

/// Combines per-client `(sample_count, metrics)` pairs into one mapping.
///
/// Implemented by [`WeightedAverage`] and by any matching closure, so a
/// strategy can be given a custom rule for fit or evaluate metrics.
pub trait MetricsAggregator: Send + Sync {
    /// Aggregate the metrics reported by one round's successful clients.
    fn aggregate(&self, results: &[(u64, &Metrics)]) -> Metrics;
}

impl<F> MetricsAggregator for F
where
    F: Fn(&[(u64, &Metrics)]) -> Metrics + Send + Sync,
{
    fn aggregate(&self, results: &[(u64, &Metrics)]) -> Metrics {
        self(results)
    }
}

/// Default metrics rule: sample-weighted mean per metric name.
#[derive(Clone, Copy, Debug, Default)]
pub struct WeightedAverage;

impl MetricsAggregator for WeightedAverage {
    fn aggregate(&self, results: &[(u64, &Metrics)]) -> Metrics {
        weighted_metrics(results)
    }
}

/// Weighted mean of every metric name, over the clients that reported it.
///
/// A metric whose reporters all have zero samples is omitted rather than
/// reported as NaN.
pub fn weighted_metrics(results: &[(u64, &Metrics)]) -> Metrics {
    let mut by_name: BTreeMap<&str, Vec<(u64, f64)>> = BTreeMap::new();
    for (n, metrics) in results {
        for (name, value) in metrics.iter() {
            by_name.entry(name.as_str()).or_default().push((*n, *value));
        }
    }

    by_name
        .into_iter()
        .filter_map(|(name, entries)| {
            weighted_mean(entries)
                .ok()
                .map(|value| (name.to_string(), value))
        })
        .collect()
}

/// Weighted mean of client losses.
pub fn weighted_loss(results: &[(u64, f64)]) -> Result<f64> {
    weighted_mean(results.iter().copied())
}
