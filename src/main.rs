//! Autoupdater daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::signal;
use tokio::sync::watch;

mod config;
mod cycle;
mod detector;
mod error;
mod executor;
mod inventory;
mod notifier;
mod runtime;
mod types;

use config::{Config, RunMode};
use cycle::CycleDriver;
use notifier::{HttpSender, Notifier};
use runtime::{ContainerRuntime, DockerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load configuration
    let cfg = Config::load()?;

    // Initialize logging; RUST_LOG still takes precedence
    env_logger::Builder::new()
        .filter_level(cfg.log_filter()?)
        .parse_default_env()
        .init();

    let filter = cfg.scope_filter()?;
    let mode = cfg.mode()?;
    info!("Docker autoupdater starting...");
    info!("  Check interval:   {} minutes", cfg.check_interval_minutes);
    info!("  Auto-update:      {}", cfg.auto_update);
    info!(
        "  Label filter:     {}",
        filter
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "None (all containers)".into())
    );
    info!("  Dry run:          {}", cfg.dry_run);
    info!("  Rollback:         {}", cfg.rollback_on_failure);
    info!(
        "  Notifications:    {}",
        if cfg.webhook().is_some() { "webhook" } else { "disabled" }
    );

    // Container runtime (Docker), shared by every cycle
    let runtime = Arc::new(DockerRuntime::connect(
        cfg.call_timeout(),
        cfg.pull_timeout(),
    )?);
    if let Err(e) = runtime.ping().await {
        error!("Cannot connect to Docker daemon: {}", e);
        if mode == RunMode::SingleShot {
            return Ok(ExitCode::FAILURE);
        }
        warn!("Will keep retrying at every scheduled check");
    }

    // Notifications
    let sender = Arc::new(HttpSender::new(cfg.notify_timeout())?);
    let notifier = Notifier::new(cfg.webhook().map(str::to_string), sender);

    // Graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut driver = CycleDriver::new(
        runtime.clone(),
        runtime,
        notifier,
        filter,
        cfg.policy(),
        shutdown_rx,
    );
    let failed = driver.run(mode).await;

    info!("Shutdown complete.");
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
