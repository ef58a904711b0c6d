use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waav_bridge::{
    ServerConfig,
    bridge::{PairingRegistry, RealtimeSessionFactory, log_alerts},
    routes,
    state::AppState,
};

/// How often reserved-but-unused pairs are reaped
const REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// WaaV Bridge - telephony to speech-to-speech AI audio bridge
#[derive(Parser, Debug)]
#[command(name = "waav-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize crypto provider for wss:// connections to the AI service
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let realtime_config = config.realtime_config().map_err(|e| anyhow!(e))?;
    let settings = config.bridge_settings();
    info!(
        encoding = %settings.encoding,
        manual_turns = settings.manual_turns,
        "Bridge configured"
    );

    let factory = Arc::new(RealtimeSessionFactory::new(
        "openai",
        realtime_config,
        settings.encoding,
    ));
    let registry = Arc::new(PairingRegistry::new(factory, settings));

    let shutdown = CancellationToken::new();
    let reaper = registry.spawn_reaper(REAPER_INTERVAL, shutdown.clone());

    let alert_task = tokio::spawn(log_alerts(registry.subscribe_alerts()));

    let address = config.address();
    let app_state = AppState::new(config, registry);
    let app = routes::create_app(app_state);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    let _ = reaper.await;
    alert_task.abort();

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
    info!("Shutdown signal received");
}
