//! # Groundlink
//!
//! Serial telemetry ground station.
//!
//! Reads telemetry frames from the receiver, writes them to a per-run CSV
//! flight log and streams live updates to WebSocket dashboards.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use groundlink::broadcast::{ws, TelemetryHub};
use groundlink::config::{Config, LoggingConfig};
use groundlink::pipeline::Pipeline;
use groundlink::serial::locator;
use groundlink::serial::port_trait::TokioSerialOpener;
use groundlink::serial::{ConnectionManager, LinkTiming};
use groundlink::telemetry::logger::TelemetryLogger;
use groundlink::telemetry::parser::TelemetryParser;

/// Config file used when none is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for Groundlink
///
/// # Control Flow
///
/// 1. Load configuration (first argument, or `config/default.toml`)
/// 2. Open this run's flight log
/// 3. Spawn the ingestion task (locate, connect, read, parse, log, publish)
/// 4. Serve WebSocket subscribers
/// 5. On Ctrl+C, close the flight log and exit
///
/// # Errors
///
/// Returns error if the configuration is invalid, the flight log cannot be
/// created or written, or the server address cannot be bound
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let _log_guard = init_tracing(&config.logging);
    info!("Groundlink v{} starting...", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(TelemetryHub::new(Duration::from_millis(
        config.server.send_timeout_ms,
    )));

    let logger = if config.telemetry.enabled {
        let logger = TelemetryLogger::create(&config.telemetry).context("Failed to open flight log")?;
        Some(Arc::new(Mutex::new(logger)))
    } else {
        info!("Flight logging disabled");
        None
    };

    let parser = TelemetryParser::with_ranges(config.channel_ranges());
    let pipeline = Pipeline::new(parser, logger.clone(), hub.clone());

    let locator = locator::from_config(&config.serial);
    let initial = locator.locate();
    let manager = ConnectionManager::new(
        TokioSerialOpener::new(config.serial.baud_rate),
        locator,
        pipeline,
        LinkTiming::from(&config.serial),
    );
    let mut ingest = tokio::spawn(manager.run(initial));

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    let mut server = tokio::spawn(ws::serve(listener, hub.clone()));

    info!("Press Ctrl+C to exit");

    let outcome: Result<()> = tokio::select! {
        joined = &mut ingest => match joined {
            Ok(result) => result.context("Ingestion failed"),
            Err(e) => Err(e).context("Ingestion task panicked"),
        },
        joined = &mut server => match joined {
            Ok(result) => result.context("Server failed"),
            Err(e) => Err(e).context("Server task panicked"),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    };

    ingest.abort();
    server.abort();

    if let Some(logger) = logger {
        logger.lock().await.close().context("Failed to close flight log")?;
    }

    if let Err(ref e) = outcome {
        error!("{:#}", e);
    }
    outcome
}

/// Set up stdout logging and, if configured, a daily-rolling log file
fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let stdout = tracing_subscriber::fmt::layer();

    match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "groundlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            None
        }
    }
}
