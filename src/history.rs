//! Experiment history and pluggable history sinks.
//!
//! [`History`] is the in-memory, append-only record returned by the
//! server. Other [`HistorySink`]s (such as [`JsonLinesSink`]) receive the
//! same records as they are produced.

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregators::Metrics;

/// Which evaluation a loss or metric came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    /// Server-side evaluation on held-out data
    Centralized,
    /// Aggregated client evaluation
    Distributed,
    /// Aggregated client training metrics
    DistributedFit,
}

/// Bookkeeping for one completed round.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round number (1-indexed).
    pub round: u64,
    /// Clients sampled for fit.
    pub fit_sampled: usize,
    /// Clients whose update was aggregated.
    pub fit_succeeded: usize,
    /// Clients dropped from fit.
    pub fit_failed: usize,
    /// Clients sampled for evaluation.
    pub evaluate_sampled: usize,
    /// Clients whose evaluation was aggregated.
    pub evaluate_succeeded: usize,
    /// Clients dropped from evaluation.
    pub evaluate_failed: usize,
    /// Total training examples behind the new global state.
    pub num_examples: u64,
    /// L2 distance between the previous and the new global state.
    pub update_norm: f32,
    /// Wall-clock duration of the round in milliseconds.
    pub elapsed_ms: u64,
}

/// Receives history records as rounds complete.
pub trait HistorySink: Send {
    /// Record an aggregated loss.
    fn record_loss(&mut self, series: Series, round: u64, loss: f64);

    /// Record aggregated metrics.
    fn record_metrics(&mut self, series: Series, round: u64, metrics: &Metrics);

    /// Record a round summary.
    fn record_summary(&mut self, _summary: &RoundSummary) {}
}

/// Time series of losses and metrics over an experiment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    losses: BTreeMap<Series, Vec<(u64, f64)>>,
    metrics: BTreeMap<Series, BTreeMap<String, Vec<(u64, f64)>>>,
    rounds: Vec<RoundSummary>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// `(round, loss)` pairs of a series, in recording order.
    pub fn losses(&self, series: Series) -> &[(u64, f64)] {
        self.losses.get(&series).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(round, value)` pairs of one metric, in recording order.
    pub fn metric(&self, series: Series, name: &str) -> &[(u64, f64)] {
        self.metrics
            .get(&series)
            .and_then(|m| m.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names of the metrics recorded in a series.
    pub fn metric_names(&self, series: Series) -> Vec<&str> {
        self.metrics
            .get(&series)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Most recent loss of a series.
    pub fn last_loss(&self, series: Series) -> Option<f64> {
        self.losses(series).last().map(|&(_, loss)| loss)
    }

    /// Per-round summaries.
    pub fn rounds(&self) -> &[RoundSummary] {
        &self.rounds
    }

    /// Serialize the history to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl HistorySink for History {
    fn record_loss(&mut self, series: Series, round: u64, loss: f64) {
        self.losses.entry(series).or_default().push((round, loss));
    }

    fn record_metrics(&mut self, series: Series, round: u64, metrics: &Metrics) {
        let by_name = self.metrics.entry(series).or_default();
        for (name, value) in metrics {
            by_name.entry(name.clone()).or_default().push((round, *value));
        }
    }

    fn record_summary(&mut self, summary: &RoundSummary) {
        self.rounds.push(summary.clone());
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Loss {
        series: Series,
        round: u64,
        value: f64,
    },
    Metrics {
        series: Series,
        round: u64,
        values: &'a Metrics,
    },
    Summary(&'a RoundSummary),
}

/// Writes every record as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, record: &Record<'_>) {
        let result = serde_json::to_writer(&mut self.writer, record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            warn!(error = %e, "failed to write history record");
        }
    }
}

impl<W: Write + Send> HistorySink for JsonLinesSink<W> {
    fn record_loss(&mut self, series: Series, round: u64, loss: f64) {
        self.write(&Record::Loss {
            series,
            round,
            value: loss,
        });
    }

    fn record_metrics(&mut self, series: Series, round: u64, metrics: &Metrics) {
        self.write(&Record::Metrics {
            series,
            round,
            values: metrics,
        });
    }

    fn record_summary(&mut self, summary: &RoundSummary) {
        self.write(&Record::Summary(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(v: f64) -> Metrics {
        let mut m = Metrics::new();
        m.insert("accuracy".to_string(), v);
        m
    }

    #[test]
    fn test_history_appends_per_series() {
        let mut h = History::new();
        h.record_loss(Series::Centralized, 0, 0.9);
        h.record_loss(Series::Centralized, 1, 0.5);
        h.record_loss(Series::Distributed, 1, 0.6);
        h.record_metrics(Series::Distributed, 1, &acc(0.7));
        h.record_metrics(Series::Distributed, 2, &acc(0.8));

        assert_eq!(h.losses(Series::Centralized), &[(0, 0.9), (1, 0.5)]);
        assert_eq!(h.last_loss(Series::Distributed), Some(0.6));
        assert_eq!(h.metric(Series::Distributed, "accuracy"), &[(1, 0.7), (2, 0.8)]);
        assert_eq!(h.metric_names(Series::Distributed), vec!["accuracy"]);
        assert!(h.losses(Series::DistributedFit).is_empty());
        assert!(h.metric(Series::Centralized, "accuracy").is_empty());
    }

    #[test]
    fn test_history_json_roundtrip() {
        let mut h = History::new();
        h.record_loss(Series::Distributed, 1, 0.25);
        h.record_metrics(Series::DistributedFit, 1, &acc(0.5));
        h.record_summary(&RoundSummary {
            round: 1,
            fit_sampled: 3,
            fit_succeeded: 2,
            fit_failed: 1,
            ..Default::default()
        });

        let json = h.to_json().unwrap();
        let restored: History = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, h);
        assert_eq!(restored.rounds()[0].fit_failed, 1);
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record_loss(Series::Centralized, 2, 0.5);
        sink.record_metrics(Series::Distributed, 2, &acc(0.9));
        sink.record_summary(&RoundSummary {
            round: 2,
            ..Default::default()
        });

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "loss");
        assert_eq!(lines[0]["series"], "centralized");
        assert_eq!(lines[1]["values"]["accuracy"], 0.9);
        assert_eq!(lines[2]["kind"], "summary");
        assert_eq!(lines[2]["round"], 2);
    }
}
