//! Error types for fedsim

use thiserror::Error;

/// All possible errors in fedsim
#[derive(Error, Debug)]
pub enum FedError {
    /// A parameter tensor does not have the shape the global state expects
    #[error("Shape mismatch for parameter '{key}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Parameter name
        key: String,
        /// Shape held by the reference state
        expected: Vec<usize>,
        /// Shape that was received
        actual: Vec<usize>,
    },

    /// A parameter present in the reference state is absent from an update
    #[error("Missing parameter '{0}'")]
    MissingParameter(String),

    /// An update carries a parameter the reference state does not know
    #[error("Unexpected parameter '{0}'")]
    UnexpectedParameter(String),

    /// A client reported zero training or evaluation examples
    #[error("Client {cid} reported an empty dataset")]
    EmptyDataset {
        /// Client identifier
        cid: String,
    },

    /// No sampled client returned a usable fit result
    #[error("No client updates to aggregate")]
    NoUpdates,

    /// Total aggregation weight was zero
    #[error("Aggregation weights sum to zero")]
    AggregationDivideByZero,

    /// Not enough clients in the pool to satisfy a sampling request
    #[error("Insufficient clients: need {needed}, {available} available")]
    InsufficientClients {
        /// Minimum number of clients required
        needed: usize,
        /// Clients actually registered
        available: usize,
    },

    /// Some clients failed and the strategy does not accept failures
    #[error("{failures} client(s) failed in round {round}")]
    ClientFailures {
        /// Round in which the failures happened
        round: u64,
        /// Number of failed clients
        failures: usize,
    },

    /// A client task panicked while running
    #[error("Client panicked: {0}")]
    ClientPanic(String),

    /// A configuration value is outside its valid range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be built
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// A configuration document could not be parsed
    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// Reading a configuration or history file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Array shape error
    #[error("Array shape error: {0}")]
    ShapeError(String),
}

impl From<ndarray::ShapeError> for FedError {
    fn from(e: ndarray::ShapeError) -> Self {
        FedError::ShapeError(e.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for FedError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        FedError::Pool(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FedError>;
