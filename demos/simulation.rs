//! End-to-end FedAvg simulation on synthetic data
//!
//! Run with `RUST_LOG=fedsim=debug` to see per-client activity.

use fedsim::sim::{synthetic_classification, LogisticRegression};
use fedsim::{
    ClientManager, ClientProxy, FedAvg, HeldOutEvaluator, IidPartitioner, JsonLinesSink, Model,
    ModelClient, Series, Server, SimulationConfig,
};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "num_rounds": 10,
    "num_clients": 20,
    "max_concurrency": 4,
    "epochs": 2,
    "lr": 0.2,
    "lr_decay": 0.95,
    "strategy": {
        "fraction_fit": 0.5,
        "fraction_evaluate": 0.25,
        "seed": 2024
    }
}"#;

const DIM: usize = 8;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SimulationConfig::from_json_str(CONFIG)?;
    let seed = config.strategy.seed;

    let data = synthetic_classification(5_000, DIM, seed)?;
    let train_idx: Vec<usize> = (0..4_000).collect();
    let test_idx: Vec<usize> = (4_000..5_000).collect();
    let partitioner = IidPartitioner::new(&data.select(&train_idx), config.num_clients, 0.1, seed)?;

    let mut manager = ClientManager::new();
    for cid in 0..config.num_clients as u64 {
        let client = ModelClient::from_partitioner(
            cid.to_string(),
            LogisticRegression::new(DIM),
            &partitioner,
            seed.wrapping_add(cid),
        )?;
        manager.register(ClientProxy::new(cid.to_string(), client));
    }

    let evaluator = HeldOutEvaluator::new(LogisticRegression::new(DIM), data.select(&test_idx))?;
    let strategy = FedAvg::new(config.strategy.clone(), config.schedule()?)?
        .with_centralized_evaluator(evaluator);

    let records = std::env::temp_dir().join("fedsim_history.jsonl");
    let initial = LogisticRegression::new(DIM).get_parameters();
    let mut server = Server::new(manager, strategy, initial, config.max_concurrency)?
        .with_sink(JsonLinesSink::new(std::fs::File::create(&records)?));
    let history = server.run(config.num_rounds)?;

    println!("\n{:<6} {:>12} {:>12} {:>10}", "round", "central", "distributed", "accuracy");
    let accuracy = history.metric(Series::Centralized, "accuracy");
    for (i, &(round, loss)) in history.losses(Series::Centralized).iter().enumerate() {
        let distributed = history
            .losses(Series::Distributed)
            .iter()
            .find(|(r, _)| *r == round)
            .map(|(_, l)| format!("{:.4}", l))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:>12.4} {:>12} {:>10.3}",
            round,
            loss,
            distributed,
            accuracy.get(i).map(|&(_, a)| a).unwrap_or(f64::NAN)
        );
    }

    println!("\nHistory records written to {}", records.display());
    Ok(())
}
