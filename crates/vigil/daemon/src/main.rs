//! Vigil Daemon - Resilience and monitoring runtime
//!
//! Runs the orchestrator until Ctrl+C or SIGTERM:
//! - Main collection cycle through circuit breakers, retries and cache fallback
//! - Monitoring, alerting and anomaly workers
//! - Optional daily-rotated log files, pruned by the collection cycle

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_daemon::{logs, DaemonConfig, Orchestrator};

/// Vigil Daemon CLI
#[derive(Parser)]
#[command(name = "vigild")]
#[command(about = "Vigil Daemon - Resilience and monitoring runtime", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "VIGIL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VIGIL_LOG_JSON")]
    json: bool,

    /// Directory for rotated log files
    #[arg(long, env = "VIGIL_LOG_DIR")]
    log_dir: Option<String>,

    /// Directory for cache snapshots and model artifacts; enables persistence
    #[arg(long, env = "VIGIL_DATA_DIR")]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading configuration from {:?}", cli.config))?;

    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(dir) = cli.log_dir {
        config.logging.dir = Some(dir);
    }

    // Initialize tracing
    let level = cli.log_level.unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    // Guard flushes the file writer on exit
    let (file_layer, _log_guard) = match config.log_dir() {
        Some(dir) => {
            let (writer, guard) = logs::file_writer(&dir, &config.logging.file_prefix)
                .with_context(|| format!("opening log directory {}", dir.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.service.name,
        data_dir = %config.service.data_dir,
        log_dir = ?config.logging.dir,
        "Starting vigild"
    );

    let orchestrator = Orchestrator::new(config);
    orchestrator.initialize()?;
    orchestrator.start()?;

    shutdown_signal().await;

    orchestrator.stop().await;
    let status = orchestrator.status();
    tracing::info!(
        cycles = status.stats.cycles_completed,
        alerts = status.stats.alerts_triggered,
        anomalies = status.stats.anomalies_detected,
        "vigild stopped"
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
