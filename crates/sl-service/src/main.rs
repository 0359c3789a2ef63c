#![forbid(unsafe_code)]

//! Boots every collaborator, replays the event log on startup, and serves
//! the HTTP surface until a shutdown signal arrives.

use anyhow::{Context, Result};
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sl_service::{build_state, lifecycle, replay_on_boot, routes, ServiceConfig};
use sl_service::request_id::RequestIdLayer;

#[derive(Parser)]
#[command(name = "sl-service")]
#[command(about = "Per-store inventory service with a durable event-sourced write path")]
#[command(version)]
struct Cli {
    /// Root directory for the service's JSON files, overriding
    /// `STOCKLEDGER_DATA_DIR`.
    #[arg(long)]
    data_dir: Option<String>,

    /// TCP port to bind, overriding `PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// `tracing_subscriber::EnvFilter` directive, overriding `LOG_LEVEL`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    lifecycle::install_panic_hook();

    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir.into();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    init_logging(&config.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting StockLedger service");

    let state = build_state(&config).await.context("failed to assemble application state")?;

    replay_on_boot(&state).await?;
    state.sync.start(None).await;

    let app = routes::build_router(state.clone()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestIdLayer)
            .layer(CorsLayer::permissive())
            .into_inner(),
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind to port {}", config.port))?;
    info!(port = config.port, "HTTP server listening");

    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let received = lifecycle::wait_for_shutdown_signal().await;
        let _ = signal_tx.send(received);
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "HTTP server error");
    }

    let signal = signal_rx.await.unwrap_or(lifecycle::ShutdownSignal::Terminate);
    lifecycle::graceful_shutdown(&state, signal).await;

    info!("StockLedger service stopped");
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(format!(
        "sl_service={log_level},sl_mutation={log_level},sl_sync={log_level}"
    ))
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}
