use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::filter::LevelFilter;

use qsbridged::api::QsApiClient;
use qsbridged::api::RestClient;
use qsbridged::CommandQueue;
use qsbridged::Config;
use qsbridged::PollCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse config file path from CLI or use default
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "qsbridged.toml".to_string());

    let config = Config::from_file(&config_path)?;

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("qsbridged starting");
    tracing::info!("Loaded config from: {}", config_path);
    tracing::info!(
        "command_delay: {}s, poll_interval: {}s",
        config.bridge.command_delay,
        config.bridge.poll_interval
    );

    let client: Arc<dyn QsApiClient> =
        Arc::new(RestClient::new(&config.api).context("Failed to create API client")?);

    // Register API keys once at startup; nothing else works without them
    {
        let client = Arc::clone(&client);
        tokio::task::spawn_blocking(move || client.generate_api_keys())
            .await?
            .context("Failed to generate QwikSwitch API keys")?;
    }
    tracing::info!("API keys generated");

    let queue = Arc::new(CommandQueue::new(Duration::from_secs(
        config.bridge.command_delay,
    )));
    // The queue owns the client from here on; every call is serialized
    // and throttled through it
    queue.start(Arc::clone(&client));

    let coordinator = Arc::new(PollCoordinator::new(
        Arc::clone(&queue),
        Duration::from_secs(config.bridge.poll_interval),
    ));

    // First refresh so a snapshot exists before steady-state polling
    coordinator
        .refresh()
        .await
        .context("Initial device poll failed")?;
    tracing::info!(
        "Initial poll complete, {} devices known",
        coordinator.snapshot().devices.len()
    );

    coordinator.start();

    tracing::info!("qsbridged running, press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    coordinator.stop();
    queue.stop();

    // Keys do not need to outlive the bridge
    let client = Arc::clone(&client);
    if let Err(e) = tokio::task::spawn_blocking(move || client.delete_api_keys()).await? {
        tracing::warn!("Could not delete QwikSwitch API keys: {}", e);
    }

    tracing::info!("qsbridged shutdown complete");

    Ok(())
}
