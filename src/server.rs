//! Experiment driver.
//!
//! The [`Server`] owns the global state between rounds and runs rounds
//! strictly one after another: round `r + 1` is configured only after
//! every round `r` client task has finished and the aggregate has been
//! published. A failed aggregation leaves the previous state in place.
//! Once a round's state is published the round is always recorded;
//! evaluation errors after that point are logged and skipped.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::aggregators::Metrics;
use crate::client::{EvaluateRes, FitRes};
use crate::dispatch::{split_outcomes, WorkerPool};
use crate::error::{FedError, Result};
use crate::history::{History, HistorySink, RoundSummary, Series};
use crate::state::ModelState;
use crate::strategy::{ClientManager, RoundPhase, Strategy};

/// Runs federated rounds and records their results.
pub struct Server<S: Strategy> {
    manager: ClientManager,
    strategy: S,
    pool: WorkerPool,
    global: ModelState,
    history: History,
    sinks: Vec<Box<dyn HistorySink>>,
    phase: RoundPhase,
    started: bool,
    last_round: u64,
}

impl<S: Strategy> Server<S> {
    /// Create a server starting from `initial` with at most
    /// `max_concurrency` client tasks in flight.
    pub fn new(
        manager: ClientManager,
        strategy: S,
        initial: ModelState,
        max_concurrency: usize,
    ) -> Result<Self> {
        Ok(Self {
            manager,
            strategy,
            pool: WorkerPool::new(max_concurrency)?,
            global: initial,
            history: History::new(),
            sinks: Vec::new(),
            phase: RoundPhase::Init,
            started: false,
            last_round: 0,
        })
    }

    /// Forward every history record to `sink` as well.
    pub fn with_sink(mut self, sink: impl HistorySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Current global state.
    pub fn global_state(&self) -> &ModelState {
        &self.global
    }

    /// History recorded so far.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Current phase of the round state machine.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Registered clients.
    pub fn client_manager(&self) -> &ClientManager {
        &self.manager
    }

    /// Registered clients, for liveness updates between rounds.
    pub fn client_manager_mut(&mut self) -> &mut ClientManager {
        &mut self.manager
    }

    /// Last round whose global state was published; 0 before the first.
    pub fn last_round(&self) -> u64 {
        self.last_round
    }

    /// The strategy driving the rounds.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Run `num_rounds` more rounds.
    ///
    /// The first call starts with the strategy's initial parameters (if
    /// any) and a round-0 centralized baseline. Later calls continue
    /// numbering after [`last_round`](Self::last_round). The first
    /// fit-phase error aborts the experiment and is returned; the history
    /// and global state from completed rounds stay available.
    pub fn run(&mut self, num_rounds: u64) -> Result<History> {
        info!(
            first_round = self.last_round + 1,
            num_rounds,
            clients = self.manager.num_available(),
            max_concurrency = self.pool.max_concurrency(),
            "starting federated experiment"
        );

        let result = self.run_rounds(num_rounds);
        self.enter(RoundPhase::Terminated);
        match &result {
            Ok(()) => info!(num_rounds, "federated experiment finished"),
            Err(e) => warn!(error = %e, "federated experiment aborted"),
        }
        result.map(|()| self.history.clone())
    }

    fn run_rounds(&mut self, num_rounds: u64) -> Result<()> {
        if !self.started {
            self.started = true;
            if let Some(initial) = self.strategy.initialize_parameters() {
                debug!(params = initial.num_params(), "using strategy-provided initial state");
                self.global = initial;
            }
            self.evaluate_centralized(0);
        }
        let first = self.last_round + 1;
        for round in first..first + num_rounds {
            self.run_round(round)?;
        }
        Ok(())
    }

    /// Run a single round: fit, distributed and centralized evaluation.
    ///
    /// `round` must be greater than [`last_round`](Self::last_round).
    pub fn run_round(&mut self, round: u64) -> Result<RoundSummary> {
        if round <= self.last_round {
            return Err(FedError::InvalidConfig(format!(
                "round {} is not after the last completed round {}",
                round, self.last_round
            )));
        }
        self.started = true;
        let start = Instant::now();
        info!(round, "round started");
        let mut summary = RoundSummary {
            round,
            ..Default::default()
        };

        self.fit_round(round, &mut summary)?;
        self.last_round = round;
        if let Err(e) = self.evaluate_round(round, &mut summary) {
            warn!(round, error = %e, "distributed evaluation failed");
        }
        self.evaluate_centralized(round);

        summary.elapsed_ms = start.elapsed().as_millis() as u64;
        self.history.record_summary(&summary);
        for sink in &mut self.sinks {
            sink.record_summary(&summary);
        }
        info!(
            round,
            fit_succeeded = summary.fit_succeeded,
            fit_failed = summary.fit_failed,
            update_norm = summary.update_norm,
            elapsed_ms = summary.elapsed_ms,
            "round finished"
        );
        Ok(summary)
    }

    fn fit_round(&mut self, round: u64, summary: &mut RoundSummary) -> Result<()> {
        self.enter(RoundPhase::ConfigureFit);
        let instructions = self.strategy.configure_fit(round, &self.manager)?;

        self.enter(RoundPhase::CollectFit);
        let global = &self.global;
        let config = &instructions.config;
        let outcomes = self
            .pool
            .run(&instructions.clients, |proxy| proxy.fit(global, config));
        let (results, failures) = split_outcomes::<FitRes>(outcomes);
        summary.fit_sampled = instructions.clients.len();

        self.enter(RoundPhase::AggregateFit);
        let aggregate = self
            .strategy
            .aggregate_fit(round, &self.global, results, failures)?;

        summary.fit_succeeded = aggregate.num_contributors;
        summary.fit_failed = summary.fit_sampled - aggregate.num_contributors;
        summary.num_examples = aggregate.num_examples;
        summary.update_norm = self.global.l2_distance(&aggregate.parameters)?;

        self.global = aggregate.parameters;
        if !aggregate.metrics.is_empty() {
            self.record_metrics(Series::DistributedFit, round, &aggregate.metrics);
        }
        Ok(())
    }

    fn evaluate_round(&mut self, round: u64, summary: &mut RoundSummary) -> Result<()> {
        self.enter(RoundPhase::ConfigureEvaluate);
        let instructions = match self.strategy.configure_evaluate(round, &self.manager)? {
            Some(instructions) => instructions,
            None => return Ok(()),
        };

        self.enter(RoundPhase::CollectEvaluate);
        let global = &self.global;
        let config = &instructions.config;
        let outcomes = self
            .pool
            .run(&instructions.clients, |proxy| proxy.evaluate(global, config));
        let (results, failures) = split_outcomes::<EvaluateRes>(outcomes);
        summary.evaluate_sampled = instructions.clients.len();
        let dispatch_failures = failures.len();

        self.enter(RoundPhase::AggregateEvaluate);
        match self.strategy.aggregate_evaluate(round, results, failures)? {
            Some(aggregate) => {
                summary.evaluate_succeeded = aggregate.num_contributors;
                summary.evaluate_failed = summary.evaluate_sampled - aggregate.num_contributors;
                self.record_loss(Series::Distributed, round, aggregate.loss);
                self.record_metrics(Series::Distributed, round, &aggregate.metrics);
            }
            None => {
                summary.evaluate_failed = dispatch_failures;
                warn!(round, "no distributed evaluation recorded");
            }
        }
        Ok(())
    }

    fn evaluate_centralized(&mut self, round: u64) {
        match self.strategy.evaluate(round, &self.global) {
            Ok(Some((loss, metrics))) => {
                info!(round, loss, "centralized evaluation");
                self.record_loss(Series::Centralized, round, loss);
                self.record_metrics(Series::Centralized, round, &metrics);
            }
            Ok(None) => {}
            Err(e) => warn!(round, error = %e, "centralized evaluation failed"),
        }
    }

    fn record_loss(&mut self, series: Series, round: u64, loss: f64) {
        self.history.record_loss(series, round, loss);
        for sink in &mut self.sinks {
            sink.record_loss(series, round, loss);
        }
    }

    fn record_metrics(&mut self, series: Series, round: u64, metrics: &Metrics) {
        self.history.record_metrics(series, round, metrics);
        for sink in &mut self.sinks {
            sink.record_metrics(series, round, metrics);
        }
    }

    fn enter(&mut self, phase: RoundPhase) {
        debug!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }
}
