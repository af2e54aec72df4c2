//! Round hyperparameters and experiment configuration.
//!
//! [`ConfigProvider`] is the per-round configuration contract: a pure
//! function of the round index whose fixed context is supplied at
//! construction. [`StrategyConfig`] and [`SimulationConfig`] are the
//! serde-loadable experiment settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};

/// Hyperparameters every sampled client uses for one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Round this configuration was produced for (1-indexed, 0 = baseline)
    pub server_round: u64,
    /// Local epochs over the client's training partition
    pub epochs: u32,
    /// Local learning rate
    pub lr: f32,
}

impl RoundConfig {
    /// Create a validated round configuration.
    pub fn new(server_round: u64, epochs: u32, lr: f32) -> Result<Self> {
        validate_epochs_lr(epochs, lr)?;
        Ok(Self {
            server_round,
            epochs,
            lr,
        })
    }
}

fn validate_epochs_lr(epochs: u32, lr: f32) -> Result<()> {
    if epochs == 0 {
        return Err(FedError::InvalidConfig("epochs must be > 0".to_string()));
    }
    if !(lr.is_finite() && lr > 0.0) {
        return Err(FedError::InvalidConfig(format!(
            "lr must be a positive number, got {}",
            lr
        )));
    }
    Ok(())
}

/// Produces the [`RoundConfig`] for a round.
///
/// Implementations must return identical output for identical input.
pub trait ConfigProvider: Send + Sync {
    /// Configuration for `round`.
    fn config_for_round(&self, round: u64) -> RoundConfig;
}

/// Same epochs and learning rate every round.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedConfig {
    epochs: u32,
    lr: f32,
}

impl FixedConfig {
    /// Create a fixed schedule.
    pub fn new(epochs: u32, lr: f32) -> Result<Self> {
        validate_epochs_lr(epochs, lr)?;
        Ok(Self { epochs, lr })
    }
}

impl ConfigProvider for FixedConfig {
    fn config_for_round(&self, round: u64) -> RoundConfig {
        RoundConfig {
            server_round: round,
            epochs: self.epochs,
            lr: self.lr,
        }
    }
}

/// Step learning-rate decay: `lr = initial_lr * decay^((round - 1) / step)`.
#[derive(Clone, Debug, PartialEq)]
pub struct StepDecay {
    epochs: u32,
    initial_lr: f32,
    decay: f32,
    step: u64,
}

impl StepDecay {
    /// Create a decaying schedule.
    ///
    /// # Arguments
    ///
    /// * `decay` - Multiplicative factor in `(0, 1]`
    /// * `step` - Rounds between decays, at least 1
    pub fn new(epochs: u32, initial_lr: f32, decay: f32, step: u64) -> Result<Self> {
        validate_epochs_lr(epochs, initial_lr)?;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(FedError::InvalidConfig(format!(
                "decay must be in (0, 1], got {}",
                decay
            )));
        }
        if step == 0 {
            return Err(FedError::InvalidConfig("decay step must be > 0".to_string()));
        }
        Ok(Self {
            epochs,
            initial_lr,
            decay,
            step,
        })
    }
}

impl ConfigProvider for StepDecay {
    fn config_for_round(&self, round: u64) -> RoundConfig {
        let steps = round.saturating_sub(1) / self.step;
        let exponent = i32::try_from(steps).unwrap_or(i32::MAX);
        RoundConfig {
            server_round: round,
            epochs: self.epochs,
            lr: self.initial_lr * self.decay.powi(exponent),
        }
    }
}

/// Client sampling and failure policy for [`FedAvg`](crate::strategy::FedAvg).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Fraction of the pool sampled for fit each round
    pub fraction_fit: f64,
    /// Fraction of the pool sampled for evaluation (0 disables it)
    pub fraction_evaluate: f64,
    /// Lower bound on the fit sample size
    pub min_fit_clients: usize,
    /// Lower bound on the evaluate sample size
    pub min_evaluate_clients: usize,
    /// Rounds fail when fewer clients than this are registered
    pub min_available_clients: usize,
    /// Drop failed clients instead of failing the round
    pub accept_failures: bool,
    /// Seed for client sampling
    pub seed: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fraction_fit: 1.0,
            fraction_evaluate: 1.0,
            min_fit_clients: 1,
            min_evaluate_clients: 1,
            min_available_clients: 1,
            accept_failures: true,
            seed: 42,
        }
    }
}

impl StrategyConfig {
    /// Check every field is within range.
    pub fn validate(&self) -> Result<()> {
        if !(self.fraction_fit > 0.0 && self.fraction_fit <= 1.0) {
            return Err(FedError::InvalidConfig(format!(
                "fraction_fit must be in (0, 1], got {}",
                self.fraction_fit
            )));
        }
        if !(0.0..=1.0).contains(&self.fraction_evaluate) {
            return Err(FedError::InvalidConfig(format!(
                "fraction_evaluate must be in [0, 1], got {}",
                self.fraction_evaluate
            )));
        }
        if self.min_fit_clients == 0 || self.min_evaluate_clients == 0 {
            return Err(FedError::InvalidConfig(
                "minimum sample sizes must be >= 1".to_string(),
            ));
        }
        if self.min_available_clients == 0 {
            return Err(FedError::InvalidConfig(
                "min_available_clients must be >= 1".to_string(),
            ));
        }
        if self.min_evaluate_clients > self.min_available_clients {
            return Err(FedError::InvalidConfig(format!(
                "min_evaluate_clients ({}) exceeds min_available_clients ({})",
                self.min_evaluate_clients, self.min_available_clients
            )));
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_lr_decay() -> f32 {
    1.0
}

fn default_decay_step() -> u64 {
    1
}

/// Settings for a whole simulated experiment.
///
/// ```rust
/// use fedsim::SimulationConfig;
///
/// let config = SimulationConfig::from_json_str(
///     r#"{ "num_rounds": 3, "num_clients": 10, "epochs": 1, "lr": 0.1,
///          "strategy": { "fraction_fit": 0.5 } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.strategy.fraction_fit, 0.5);
/// assert_eq!(config.strategy.min_fit_clients, 1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Rounds to run after the round-0 baseline
    pub num_rounds: u64,
    /// Simulated clients in the pool
    pub num_clients: usize,
    /// Client tasks allowed to run at once
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Sampling and failure policy
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Local epochs per round
    pub epochs: u32,
    /// Initial local learning rate
    pub lr: f32,
    /// Multiplicative learning-rate decay (1.0 keeps it fixed)
    #[serde(default = "default_lr_decay")]
    pub lr_decay: f32,
    /// Rounds between decays
    #[serde(default = "default_decay_step")]
    pub decay_step: u64,
}

impl SimulationConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every field is within range.
    pub fn validate(&self) -> Result<()> {
        if self.num_rounds == 0 {
            return Err(FedError::InvalidConfig("num_rounds must be > 0".to_string()));
        }
        if self.num_clients == 0 {
            return Err(FedError::InvalidConfig("num_clients must be > 0".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(FedError::InvalidConfig(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        self.strategy.validate()?;
        self.schedule().map(|_| ())
    }

    /// Learning-rate schedule described by this configuration.
    pub fn schedule(&self) -> Result<StepDecay> {
        StepDecay::new(self.epochs, self.lr, self.lr_decay, self.decay_step)
    }
}
