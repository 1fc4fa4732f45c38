//! Ticker Stream Binary
//!
//! Starts the simulated stock ticker server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-stream
//! ```
//!
//! Then open <http://localhost:8080/> or stream directly:
//!
//! ```bash
//! curl -N http://localhost:8080/api/stocks
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_PORT`: HTTP port for the page and stream (default: 8080)
//! - `TICKER_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8082)
//! - `TICKER_TICK_INTERVAL_MS`: Milliseconds between ticks (default: 500)
//! - `TICKER_CHANGE_HALF_WIDTH`: Max absolute price change per tick (default: 2.5)
//! - `TICKER_CHANNEL_CAPACITY`: Frames buffered per session (default: 1)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use ticker_stream::infrastructure::telemetry;
use ticker_stream::{
    HealthServer, HealthServerState, InstrumentStore, StreamServer, StreamServerState,
    TickerConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Ticker Stream");

    let _metrics_handle = init_metrics();

    let config = TickerConfig::from_env();
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(InstrumentStore::with_defaults());
    let state = Arc::new(StreamServerState::new(
        Arc::clone(&store),
        config.stream.clone(),
        shutdown_token.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let server = match StreamServer::bind(addr, Arc::clone(&state), shutdown_token.clone())
        .await
        .with_context(|| format!("failed to start stream server on port {}", addr.port()))
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Stream server failed to start");
            return Err(e);
        }
    };

    if config.health_enabled() {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            state.sessions(),
            Arc::clone(&store),
            shutdown_token.clone(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );

        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let server_task = tokio::spawn(server.run());

    tracing::info!(addr = %addr, "Ticker stream ready");

    await_shutdown(shutdown_token).await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Stream server error"),
        Err(e) => tracing::error!(error = %e, "Stream server task failed"),
    }

    tracing::info!("Ticker stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &TickerConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        tick_interval_ms = u64::try_from(config.stream.tick_interval.as_millis()).unwrap_or(u64::MAX),
        change_half_width = config.stream.change_half_width,
        channel_capacity = config.stream.channel_capacity,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel every session.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!("Graceful shutdown started");
}
