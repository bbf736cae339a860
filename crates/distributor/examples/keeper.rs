//! Example: run the RewardDistributor keeper and print its status as JSON.
//!
//! Usage: cargo run -p distributor --example keeper -- --config keeper.json [--status-interval SECS]
//!
//! Log level via RUST_LOG (default `distributor=info`). Ctrl-C stops both loops.

use distributor::{Keeper, KeeperConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("distributor=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::new();
    let mut status_interval = 30u64;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned().unwrap_or_default();
            }
            "--status-interval" => {
                i += 1;
                status_interval = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(status_interval);
            }
            _ => {}
        }
        i += 1;
    }
    if config_path.is_empty() {
        eprintln!("Usage: keeper --config PATH [--status-interval SECS]");
        std::process::exit(1);
    }

    let config = KeeperConfig::from_json_file(&config_path)?;
    let keeper = Keeper::from_config(config)?;
    let status = keeper.status();
    let handles = keeper.start();

    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!("{}", serde_json::to_string_pretty(&status.snapshot())?);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    keeper.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
