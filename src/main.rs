use snipebot::application::app::{Adapters, Application};
use snipebot::config::Config;
use snipebot::infrastructure::mock::MockStack;
use snipebot::infrastructure::repository::InMemoryPositionRepository;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().inspect_err(|e| {
        eprintln!("configuration error: {e}");
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with_target(false)
        .init();

    info!("Starting snipebot (dry_run={})", config.dry_run);

    // Production adapters (RPC client, DEX parsers, wallet, embedded DB,
    // price-feed HTTP clients) plug in here; the mock stack keeps dry runs
    // and local development self-contained.
    let stack = MockStack::new();
    let adapters = Adapters {
        blockchain: stack.blockchain.clone(),
        strategy: stack.strategy.clone(),
        executor: stack.executor.clone(),
        price_feed: stack.price_feed.clone(),
        repository: Arc::new(InMemoryPositionRepository::new()),
    };

    let app = Application::build(config, adapters)?;
    let handle = app.start().await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down");
            handle.shutdown();
        }
        Err(e) => {
            error!("Unable to listen for shutdown signal: {e}");
            handle.shutdown();
        }
    }

    info!("Shutdown complete");
    Ok(())
}
