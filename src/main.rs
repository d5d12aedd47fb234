use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;

use faas_latency_probe::cluster_client::{ClusterClient, HttpClusterClient};
use faas_latency_probe::config::{self, ProbeConfig};
use faas_latency_probe::{logging, server, telemetry};
use faas_latency_probe::{AppState, Correlator, Instrumentation, SinkWriter};

/// Correlate load-test requests with cluster telemetry, one CSV row each.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `hooks.bind_address`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── 1. Configuration + logging ──────────────────────────────
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.hooks.bind_address = bind;
    }
    config.validate()?;
    logging::init(&config.observability);

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   ⏱   FAAS LATENCY PROBE                         ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 2. Cluster client + telemetry sources ───────────────────
    let client: Arc<dyn ClusterClient> = Arc::new(HttpClusterClient::from_config(&config.cluster)?);
    let sources = telemetry::build_sources(&config.telemetry.enabled, client, &config.cluster);
    let correlator = Correlator::new(sources, config.telemetry.timeout());
    tracing::info!(
        sources = ?correlator.source_names(),
        timeout_ms = config.telemetry.timeout_ms,
        prometheus = %config.cluster.prometheus_url,
        api_server = %config.cluster.api_server_url,
        "telemetry configured"
    );

    // ── 3. Sink ─────────────────────────────────────────────────
    let sink = SinkWriter::open(
        &config.sink.directory,
        &config.sink.prefix,
        config.sink.channel_capacity,
    )?;
    let sink_path = sink.path().to_path_buf();

    // ── 4. Shared state + hook surface ──────────────────────────
    let state = Arc::new(AppState::new(Instrumentation::new(correlator, sink.handle())));
    let reaper = state.pending.clone().spawn_reaper(config.hooks.pending_ttl());
    let app = server::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.hooks.bind_address).await?;
    let local = listener.local_addr()?;
    println!("Hooks listening on http://{local}");
    println!("  before → POST http://{local}/hooks/before");
    println!("  after  → POST http://{local}/hooks/after");
    println!("Records → {}", sink_path.display());
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.fatal.clone()))
        .await?;

    // ── 5. Drain + close the sink ───────────────────────────────
    reaper.abort();
    let abandoned = state.pending.len();
    drop(state);

    let rows = sink.close().await?;
    tracing::info!(rows, abandoned, path = %sink_path.display(), "sink closed");
    Ok(())
}

/// Resolves on Ctrl-C, SIGTERM, or a fatal sink error.
async fn shutdown_signal(fatal: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
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
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
        _ = fatal.notified() => tracing::error!("sink failed, shutting down"),
    }
}
