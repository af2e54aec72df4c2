//! Client side of a federated round.
//!
//! A [`Client`] turns a broadcast [`ModelState`] plus a [`RoundConfig`]
//! into a local update ([`FitRes`]) or an evaluation report
//! ([`EvaluateRes`]). The server only ever talks to clients through a
//! [`ClientProxy`], which pairs a client with its identifier.
//!
//! - [`model`] - model abstraction and the standard [`ModelClient`]
//! - [`data`] - in-memory datasets and partitioning

pub mod data;
pub mod model;

pub use data::{Dataset, IidPartitioner, Partitioner};
pub use model::{Model, ModelClient, TrainReport};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregators::Metrics;
use crate::config::RoundConfig;
use crate::error::Result;
use crate::state::ModelState;

/// Result of local training on one client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitRes {
    /// Post-training parameters, same layout as the broadcast state
    pub parameters: ModelState,
    /// Training examples used; the aggregation weight
    pub num_examples: u64,
    /// Optional client-reported training metrics
    pub metrics: Metrics,
}

/// Result of evaluating the broadcast state on one client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRes {
    /// Loss on the client's validation partition
    pub loss: f64,
    /// Validation examples used; the aggregation weight
    pub num_examples: u64,
    /// Client-reported evaluation metrics
    pub metrics: Metrics,
}

/// A data-owning participant.
///
/// Both calls borrow the global state immutably; any training happens on
/// a client-owned copy.
pub trait Client: Send + Sync {
    /// Train locally starting from `parameters`.
    fn fit(&self, parameters: &ModelState, config: &RoundConfig) -> Result<FitRes>;

    /// Evaluate `parameters` on local validation data.
    fn evaluate(&self, parameters: &ModelState, config: &RoundConfig) -> Result<EvaluateRes>;
}

/// Server-side handle to a registered client.
#[derive(Clone)]
pub struct ClientProxy {
    cid: String,
    client: Arc<dyn Client>,
}

impl ClientProxy {
    /// Wrap `client` under identifier `cid`.
    pub fn new(cid: impl Into<String>, client: impl Client + 'static) -> Self {
        Self {
            cid: cid.into(),
            client: Arc::new(client),
        }
    }

    /// Wrap an already shared client.
    pub fn from_arc(cid: impl Into<String>, client: Arc<dyn Client>) -> Self {
        Self {
            cid: cid.into(),
            client,
        }
    }

    /// Client identifier.
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// Forward a fit request.
    pub fn fit(&self, parameters: &ModelState, config: &RoundConfig) -> Result<FitRes> {
        self.client.fit(parameters, config)
    }

    /// Forward an evaluate request.
    pub fn evaluate(&self, parameters: &ModelState, config: &RoundConfig) -> Result<EvaluateRes> {
        self.client.evaluate(parameters, config)
    }
}

impl fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProxy").field("cid", &self.cid).finish()
    }
}
