//! Sensorhub Binary Entry Point
//!
//! This binary runs the complete device-side agent. Core functionality is
//! provided by the `sensorhub` library crate.

use std::sync::Arc;

use clap::Parser;
use sensorhub::{
    Agent, AgentSettings, ChannelFactory, EndpointResolver, FileKeyProvider, FixedResolver,
    GatewayResolver, HttpBridgeFactory, JsonFileStore, LogChannelFactory, PartialParameters,
    RandomNumberCollector, SensorRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sensorhub - Device-Side Cloud IoT Agent
#[derive(Parser, Debug)]
#[command(name = "sensorhub", version, about, long_about = None)]
struct Cli {
    /// Path to settings file (optional)
    #[arg(short, long, env = "SENSORHUB_CONFIG")]
    config: Option<String>,

    /// Data directory (overrides settings file)
    #[arg(long, env = "SENSORHUB_DATA_DIR")]
    data_dir: Option<String>,

    /// Telemetry bridge base URL (overrides settings file)
    #[arg(long, env = "SENSORHUB_BRIDGE_URL")]
    bridge_url: Option<String>,

    /// Explicit discovery URL, replacing gateway-derived resolution
    #[arg(long, env = "SENSORHUB_DISCOVERY_URL")]
    discovery_url: Option<String>,

    /// Cloud project id (overrides the persisted configuration)
    #[arg(long, env = "SENSORHUB_PROJECT_ID")]
    project_id: Option<String>,

    /// Cloud region (overrides the persisted configuration)
    #[arg(long, env = "SENSORHUB_CLOUD_REGION")]
    cloud_region: Option<String>,

    /// Device registry id (overrides the persisted configuration)
    #[arg(long, env = "SENSORHUB_REGISTRY_ID")]
    registry_id: Option<String>,

    /// Device id (overrides the persisted configuration)
    #[arg(long, env = "SENSORHUB_DEVICE_ID")]
    device_id: Option<String>,

    /// Device key algorithm: RS256 or ES256 (overrides the persisted
    /// configuration)
    #[arg(long, env = "SENSORHUB_KEY_ALGORITHM")]
    key_algorithm: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sensorhub=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Sensorhub - Device-Side Cloud IoT Agent");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load settings from file when given, defaults otherwise
    let mut settings = match &cli.config {
        Some(path) => {
            tracing::info!("Loading settings from: {}", path);
            AgentSettings::load(path)?
        }
        None => AgentSettings::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > settings file)
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir.into();
    }
    if let Some(bridge_url) = cli.bridge_url {
        settings.bridge_url = Some(bridge_url);
    }
    if let Some(discovery_url) = cli.discovery_url {
        settings.discovery_url = Some(discovery_url);
    }
    settings.validate()?;

    tracing::info!(
        data_dir = %settings.data_dir.display(),
        poll_interval = ?settings.poll_interval,
        publish_interval = ?settings.publish_interval,
        "Settings loaded"
    );

    // Launch overrides for the cloud identity, applied over the persisted
    // baseline field-by-field
    let launch_overrides = PartialParameters {
        project_id: cli.project_id,
        cloud_region: cli.cloud_region,
        registry_id: cli.registry_id,
        device_id: cli.device_id,
        key_algorithm: cli.key_algorithm,
    };

    let channels: Arc<dyn ChannelFactory> = match &settings.bridge_url {
        Some(url) => Arc::new(HttpBridgeFactory::new(url, settings.request_timeout)),
        None => Arc::new(LogChannelFactory),
    };

    let resolver: Arc<dyn EndpointResolver> = match &settings.discovery_url {
        Some(url) => Arc::new(FixedResolver::new(url)?),
        None => Arc::new(GatewayResolver::new()),
    };

    let mut agent = Agent::new(
        settings.clone(),
        Arc::new(JsonFileStore::new(&settings.data_dir)),
        Arc::new(FileKeyProvider::new(settings.keys_dir())),
        channels,
        resolver,
        Arc::new(|| {
            let mut registry = SensorRegistry::new();
            registry.register(Box::new(RandomNumberCollector::new()));
            registry
        }),
    );

    agent.start(launch_overrides).await?;
    tracing::info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;

    tracing::info!("Shutting down agent...");
    agent.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
