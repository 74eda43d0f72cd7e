//! gsync-daemon entry point.
//!
//! Thin on purpose: load config, set up tracing, wire adapters into the
//! engine, start the scheduler and the HTTP server.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use gsync_config::GsyncConfig;
use gsync_daemon::{cli::Args, routes, scheduler, state::AppState};
use gsync_directory::{google::GoogleConnector, GroupResolver};
use gsync_grafana::{GrafanaAuth, GrafanaClient};
use gsync_reconcile::{SyncEngine, SyncGuard};
use prometheus::Registry;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Must run before clap reads env.
    let _ = dotenvy::from_filename(".env.local");

    let (config_path, overrides) = Args::parse().into_overrides();
    let loaded = gsync_config::load(config_path.as_deref(), &overrides)?;

    init_tracing(&loaded.config.log.level);
    if let Some(path) = &loaded.source {
        info!(path = %path.display(), "loaded config file");
    }
    for w in &loaded.warnings {
        warn!("{w}");
    }

    let cfg = loaded.config;
    let shared = Arc::new(build_state(&cfg)?);
    info!(
        mode = %cfg.mode,
        rules = cfg.rules.len(),
        static_rules = cfg.static_rules.len(),
        interval_ms = cfg.interval_ms,
        grafana = %cfg.grafana_base_url(),
        "gsync-daemon configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = scheduler::spawn_scheduler(Arc::clone(&shared), cfg.interval(), shutdown_rx);

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("gsync-daemon listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server crashed")?;

    scheduler.await.context("scheduler task failed")?;
    if shared.guard.is_running() {
        warn!("exiting with a sync pass in flight");
    }
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .init();
}

fn build_state(cfg: &GsyncConfig) -> anyhow::Result<AppState> {
    let connector = Arc::new(
        GoogleConnector::new(
            cfg.google.credentials.clone(),
            cfg.google.admin_email.clone(),
        )
        .context("invalid google directory settings")?,
    );
    let resolver = Arc::new(GroupResolver::new(connector));

    let grafana = GrafanaClient::from_parts(
        &cfg.grafana.protocol,
        &cfg.grafana.host,
        GrafanaAuth::Basic {
            username: cfg.grafana.username.clone(),
            password: cfg.grafana.password.expose().to_string(),
        },
    )
    .context("invalid grafana address")?;

    let engine = Arc::new(SyncEngine::new(
        resolver,
        Arc::new(grafana),
        cfg.sync_settings(),
    ));
    let guard = Arc::new(SyncGuard::new().context("failed to create sync counters")?);

    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))
        .context("failed to register process collector")?;

    AppState::new(engine, guard, registry, cfg.interval_ms)
        .context("failed to register sync counters")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
