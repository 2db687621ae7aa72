use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use poolcam::auth::JwtVerifier;
use poolcam::config::{AuthConfig, ConfigStore};
use poolcam::session::SqliteStore;
use poolcam::state::AppState;
use poolcam::video::SystemCaptureBackend;
use poolcam::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// poolcam command line arguments
#[derive(Parser, Debug)]
#[command(name = "poolcam")]
#[command(version, about = "Live video capture and relay for pool-telemetry sessions", long_about = None)]
struct CliArgs {
    /// Path to a TOML config file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting poolcam v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::load(args.config.as_deref()).await?;
    if let Some(addr) = args.address {
        config_store.update(|c| c.server.bind_address = addr);
    }
    if let Some(port) = args.port {
        config_store.update(|c| c.server.port = port);
    }
    let config = config_store.get();

    if config.auth.secret_key == AuthConfig::default().secret_key {
        tracing::warn!("Using the built-in token secret; set POOLCAM_SECRET_KEY in production");
    }

    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    let state = AppState::new(
        config_store.clone(),
        Arc::new(SystemCaptureBackend),
        Arc::new(JwtVerifier::new(&config.auth.secret_key)),
        store.clone(),
        store,
    );

    let ip: IpAddr = config.server.bind_address.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server will listen on: http://{}", addr);

    let app = web::create_router(state.clone());

    // Live sockets never finish on their own, so shutdown does not wait for them
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    cleanup(&state).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "poolcam=error,tower_http=error",
        LogLevel::Warn => "poolcam=warn,tower_http=warn",
        LogLevel::Info => "poolcam=info,tower_http=info",
        LogLevel::Verbose => "poolcam=debug,tower_http=info",
        LogLevel::Debug => "poolcam=debug,tower_http=debug",
        LogLevel::Trace => "poolcam=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Release device handles before exit
async fn cleanup(state: &Arc<AppState>) {
    state.shutdown().await;
    tracing::info!("Capture adapters released");
}
