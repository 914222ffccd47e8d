//! Market Stream Mux Binary
//!
//! Starts one stream supervisor per configured venue and serves health.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-mux
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_API_BASE`: REST API base the stream URLs derive from (default: <http://localhost:8000/api>)
//! - `STREAM_VENUES`: Comma-separated venues (default: india,us)
//! - `STREAM_SYMBOLS`: Comma-separated symbols subscribed at startup
//! - `STREAM_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `STREAM_RECONNECT_BASE_MS` / `STREAM_RECONNECT_CAP_MS` / `STREAM_RECONNECT_JITTER_MS`
//! - `STREAM_HEARTBEAT_INTERVAL_SECS` / `STREAM_HEARTBEAT_TIMEOUT_SECS`
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream_mux::infrastructure::health::{HealthServer, HealthServerState};
use market_stream_mux::infrastructure::telemetry;
use market_stream_mux::{
    JsonCodec, MarketStore, MarketStream, MuxConfig, Subscriber, WsConnector, init_metrics,
};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Stream Mux");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus exporter unavailable");
    }

    let config = MuxConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let store = Arc::new(MarketStore::new(config.store_config()));

    let mut supervisors = JoinSet::new();
    let mut statuses = Vec::with_capacity(config.venues.len());
    let mut holders: Vec<Subscriber> = Vec::with_capacity(config.venues.len());

    for venue in &config.venues {
        let stream = MarketStream::new(venue.clone(), Arc::clone(&store));
        let supervisor_config = config
            .supervisor_config(venue)
            .with_context(|| format!("no stream endpoint for venue {venue}"))?;

        statuses.push(stream.status());
        supervisors.spawn(
            stream
                .supervisor(
                    WsConnector::new(),
                    Arc::new(JsonCodec::new()),
                    supervisor_config,
                    shutdown_token.clone(),
                )
                .run(),
        );

        let symbols = config.symbols_for(venue);
        if !symbols.is_empty() {
            let holder = stream.subscriber();
            let tokens = holder.subscribe(&symbols);
            tracing::info!(venue = %venue, tokens = tokens.len(), "Startup symbols subscribed");
            holders.push(holder);
        }
    }

    // Tick logger
    let mut ticks = store.tick_listener();
    let tick_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tick_cancel.cancelled() => break,
                tick = ticks.recv() => match tick {
                    Some(tick) => tracing::debug!(
                        token = %tick.token,
                        ltp = tick.ltp,
                        change_pct = tick.change_pct,
                        "Tick"
                    ),
                    None => break,
                },
            }
        }
    });

    // Spawn health server
    if config.server.health_enabled() {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            statuses,
            Arc::clone(&store),
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

    tracing::info!(venues = config.venues.len(), "Stream mux ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while supervisors.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Supervisors did not stop in time");
        supervisors.abort_all();
    }
    drop(holders);

    tracing::info!("Stream mux stopped");
    Ok(())
}

#[allow(clippy::expect_used)]
fn install_crypto_provider() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
}

/// Load .env file from current or ancestor directories.
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

/// Log the parsed configuration.
fn log_config(config: &MuxConfig) {
    let venues: Vec<&str> = config.venues.iter().map(|v| v.id()).collect();
    tracing::info!(
        api_base = %config.api_base,
        venues = ?venues,
        symbols = config.symbols.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for venue in &config.venues {
        if let Ok(url) = config.stream_url(venue) {
            tracing::debug!(venue = %venue, url = %url, "Stream endpoint");
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
