//! Client registry, liveness and seeded uniform sampling.
//!
//! A registered client is online until it is marked offline or, if it
//! reports heartbeats, until its last heartbeat deadline passes. Only
//! online clients are counted as available and sampled.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::index;
use tracing::debug;

use crate::client::ClientProxy;
use crate::error::{FedError, Result};

/// Tolerance for products like `0.07 * 100` landing just above an integer.
const FRACTION_EPS: f64 = 1e-9;

/// Sample size for `fraction` of `available` clients, floored at `min_clients` and 1.
pub fn sample_size(available: usize, fraction: f64, min_clients: usize) -> usize {
    let by_fraction = (fraction * available as f64 - FRACTION_EPS).ceil().max(0.0) as usize;
    by_fraction.max(min_clients).max(1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Liveness {
    Online,
    Until(Instant),
    Offline,
}

impl Liveness {
    fn is_online(self, now: Instant) -> bool {
        match self {
            Liveness::Online => true,
            Liveness::Until(deadline) => deadline > now,
            Liveness::Offline => false,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    proxy: ClientProxy,
    liveness: Liveness,
}

/// Pool of clients registered with the server.
#[derive(Clone, Debug, Default)]
pub struct ClientManager {
    clients: Vec<Entry>,
}

impl ClientManager {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    /// Register a client as online. Returns `false` if the id is already taken.
    pub fn register(&mut self, proxy: ClientProxy) -> bool {
        if self.clients.iter().any(|e| e.proxy.cid() == proxy.cid()) {
            return false;
        }
        debug!(cid = %proxy.cid(), "client registered");
        self.clients.push(Entry {
            proxy,
            liveness: Liveness::Online,
        });
        true
    }

    /// Remove a client by id. Returns `false` if it was not registered.
    pub fn unregister(&mut self, cid: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|e| e.proxy.cid() != cid);
        before != self.clients.len()
    }

    /// Mark a client online (without deadline) or offline.
    ///
    /// Returns `false` if the id is unknown.
    pub fn set_available(&mut self, cid: &str, online: bool) -> bool {
        let liveness = if online {
            Liveness::Online
        } else {
            Liveness::Offline
        };
        self.update(cid, liveness)
    }

    /// Record a heartbeat: the client stays online for `interval` from now.
    ///
    /// Returns `false` if the id is unknown.
    pub fn acknowledge_ping(&mut self, cid: &str, interval: Duration) -> bool {
        self.update(cid, Liveness::Until(Instant::now() + interval))
    }

    fn update(&mut self, cid: &str, liveness: Liveness) -> bool {
        match self.clients.iter_mut().find(|e| e.proxy.cid() == cid) {
            Some(entry) => {
                debug!(cid, ?liveness, "client liveness updated");
                entry.liveness = liveness;
                true
            }
            None => false,
        }
    }

    /// Number of registered clients, online or not.
    pub fn num_registered(&self) -> usize {
        self.clients.len()
    }

    /// Number of online clients.
    pub fn num_available(&self) -> usize {
        self.available().len()
    }

    /// Online clients, in registration order.
    pub fn available(&self) -> Vec<&ClientProxy> {
        let now = Instant::now();
        self.clients
            .iter()
            .filter(|e| e.liveness.is_online(now))
            .map(|e| &e.proxy)
            .collect()
    }

    /// Draw `num_clients` distinct online clients uniformly at random.
    ///
    /// Fails with [`FedError::InsufficientClients`] when fewer than
    /// `max(num_clients, min_available)` clients are online.
    pub fn sample(
        &self,
        num_clients: usize,
        min_available: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<ClientProxy>> {
        let online = self.available();
        let available = online.len();
        let needed = num_clients.max(min_available);
        if available < needed {
            return Err(FedError::InsufficientClients { needed, available });
        }

        Ok(index::sample(rng, available, num_clients)
            .into_iter()
            .map(|i| online[i].clone())
            .collect())
    }
}
