use anyhow::Context;
use axum::Router;
use relay_manager::config::AppConfig;
use relay_manager::metrics;
use relay_manager::routes;
use relay_manager::state::AppState;
use relay_manager::telemetry::init_tracing;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, load_err) = match AppConfig::from_env() {
        Ok(cfg) => (cfg, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    init_tracing(&cfg.log_filter);
    if let Some(err) = load_err {
        warn!(error = %err, "failed to load configuration; using defaults");
    }

    let addr = cfg.socket_addr().context("invalid bind address")?;
    let state = AppState::new(&cfg);
    let app: Router = routes::router(state.clone());

    info!(
        addr = %addr,
        websocket_enabled = cfg.websocket_enabled,
        stream_buffer = cfg.stream_buffer,
        sse_keepalive_secs = cfg.sse_keepalive_secs,
        "starting relay-manager"
    );
    metrics::BOOT_COUNTER.inc();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    state.shutdown();
    info!("relay-manager stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}
