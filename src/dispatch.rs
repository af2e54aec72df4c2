//! Bounded parallel dispatch of per-client tasks.
//!
//! Every task runs on a dedicated rayon pool sized to the configured
//! concurrency. Errors and panics are caught per task, so one failing
//! client never takes the round down with it. [`WorkerPool::run`]
//! returns only when every task has finished or failed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

use crate::client::ClientProxy;
use crate::error::{FedError, Result};

/// Per-client outcome of a dispatched task, in sample order.
pub type Outcomes<T> = Vec<(ClientProxy, Result<T>)>;

/// Fixed-size pool for client tasks.
pub struct WorkerPool {
    pool: ThreadPool,
    max_concurrency: usize,
}

impl WorkerPool {
    /// Build a pool running at most `max_concurrency` tasks at once.
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(FedError::InvalidConfig(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_concurrency)
            .thread_name(|i| format!("fedsim-client-{}", i))
            .build()?;
        Ok(Self {
            pool,
            max_concurrency,
        })
    }

    /// Configured concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `task` once per client and collect every outcome.
    pub fn run<T, F>(&self, clients: &[ClientProxy], task: F) -> Outcomes<T>
    where
        T: Send,
        F: Fn(&ClientProxy) -> Result<T> + Sync,
    {
        self.pool.install(|| {
            clients
                .par_iter()
                .map(|proxy| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| task(proxy)))
                        .unwrap_or_else(|payload| {
                            let message = panic_message(payload);
                            warn!(cid = %proxy.cid(), panic = %message, "client task panicked");
                            Err(FedError::ClientPanic(message))
                        });
                    (proxy.clone(), result)
                })
                .collect()
        })
    }
}

/// Split outcomes into successes and failures, keeping order.
pub fn split_outcomes<T>(
    outcomes: Outcomes<T>,
) -> (Vec<(ClientProxy, T)>, Vec<(ClientProxy, FedError)>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for (proxy, result) in outcomes {
        match result {
            Ok(value) => successes.push((proxy, value)),
            Err(e) => failures.push((proxy, e)),
        }
    }
    (successes, failures)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, EvaluateRes, FitRes};
    use crate::config::RoundConfig;
    use crate::state::ModelState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Noop;

    impl Client for Noop {
        fn fit(&self, _: &ModelState, _: &RoundConfig) -> Result<FitRes> {
            Err(FedError::NoUpdates)
        }

        fn evaluate(&self, _: &ModelState, _: &RoundConfig) -> Result<EvaluateRes> {
            Err(FedError::NoUpdates)
        }
    }

    fn proxies(n: usize) -> Vec<ClientProxy> {
        (0..n).map(|i| ClientProxy::new(i.to_string(), Noop)).collect()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(FedError::InvalidConfig(_))));
    }

    #[test]
    fn test_outcomes_keep_sample_order() {
        let pool = WorkerPool::new(3).unwrap();
        let clients = proxies(8);
        let outcomes = pool.run(&clients, |p| Ok(p.cid().to_string()));
        let cids: Vec<String> = outcomes.into_iter().map(|(_, r)| r.unwrap()).collect();
        let expected: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        assert_eq!(cids, expected);
    }

    #[test]
    fn test_errors_and_panics_are_isolated() {
        let pool = WorkerPool::new(2).unwrap();
        let clients = proxies(4);
        let outcomes = pool.run(&clients, |p| match p.cid() {
            "1" => Err(FedError::EmptyDataset { cid: "1".to_string() }),
            "2" => panic!("client 2 crashed"),
            _ => Ok(1u64),
        });
        let (ok, failed) = split_outcomes(outcomes);
        assert_eq!(ok.len(), 2);
        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .any(|(p, e)| p.cid() == "2"
                && matches!(e, FedError::ClientPanic(m) if m.contains("crashed"))));
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2).unwrap();
        let clients = proxies(8);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let _ = pool.run(&clients, |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
