use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use deskbook::api::{self, AppState};
use deskbook::compactor::run_compactor;
use deskbook::config::Config;
use deskbook::engine::Engine;
use deskbook::notify::NotifyHub;

const COMPACT_CHECK_EVERY: Duration = Duration::from_secs(30);

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    deskbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        hub,
        config.engine_settings(),
    )?);
    tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        COMPACT_CHECK_EVERY,
    ));

    let listener = TcpListener::bind(config.bind).await?;
    info!("deskbook listening on {}", listener.local_addr()?);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  gst_rate: {}", config.gst_rate);
    info!("  utc_offset: {}", config.calendar.offset());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let state = AppState::new(engine, config.admin_token.as_str());
    api::serve(listener, state, shutdown_signal()).await?;

    info!("deskbook stopped");
    Ok(())
}
