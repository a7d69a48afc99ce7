use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::dispatch::Dispatcher;
use super::engine::Engine;
use crate::config::DaemonConfig;
use crate::ipc::IpcServer;
use crate::platform::{self, SystemCommandRunner};

/// How long shutdown waits for the IPC server and monitor loop to wind down
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the enforcement daemon in the foreground until stopped
///
/// Network rules stay in place when the daemon exits; only uninstalling the
/// service retracts them.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    platform::ensure_admin("run the enforcement daemon")?;

    tracing::info!("Starting family-guard daemon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", config.storage.data_dir.display());
    tracing::info!(
        "Poll interval: {} seconds (tick timeout {} seconds)",
        config.monitor.poll_interval_secs,
        config.monitor.tick_timeout_secs
    );

    platform::ensure_directory_exists(&config.storage.data_dir)
        .context("Failed to create data directory")?;

    let server = IpcServer::bind(
        &config.ipc.socket_path,
        Duration::from_secs(config.ipc.request_timeout_secs),
    )
    .context("Failed to open IPC endpoint")?;

    let engine = Arc::new(
        Engine::for_system(config, Arc::new(SystemCommandRunner))
            .context("Failed to initialize enforcement engine")?,
    );

    serve_until_shutdown(engine, server).await
}

/// Drive the monitor loop and IPC server until a signal or a shutdown request
pub async fn serve_until_shutdown(engine: Arc<Engine>, server: IpcServer) -> Result<()> {
    let server_task = tokio::spawn(server.serve(
        Arc::new(Dispatcher::new(engine.clone())),
        engine.subscribe_shutdown(),
    ));
    let monitor_task = tokio::spawn(monitor_loop(engine.clone(), engine.subscribe_shutdown()));

    let mut shutdown = engine.subscribe_shutdown();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received interrupt"),
        _ = terminated() => tracing::info!("Received SIGTERM"),
        _ = shutdown.wait_for(|stop| *stop) => {}
    }
    engine.request_shutdown();

    match tokio::time::timeout(DRAIN_TIMEOUT, server_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!("IPC server error: {}", e),
        Ok(Err(e)) => tracing::error!("IPC server task failed: {}", e),
        Err(_) => tracing::warn!("IPC server did not stop within {:?}", DRAIN_TIMEOUT),
    }
    if tokio::time::timeout(DRAIN_TIMEOUT, monitor_task).await.is_err() {
        tracing::warn!("Monitor loop did not stop within {:?}", DRAIN_TIMEOUT);
    }

    tracing::info!("Daemon stopped");
    Ok(())
}

/// Enforce on every poll interval until shutdown
pub async fn monitor_loop(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(engine.config().monitor.poll_interval());
    // A late tick is not made up for; the next one enforces the same state
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => run_tick(&engine).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Monitor loop stopped");
}

async fn run_tick(engine: &Arc<Engine>) {
    let timeout = engine.config().monitor.tick_timeout();
    let worker = engine.clone();

    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || worker.tick())).await {
        Ok(Ok(Ok(killed))) => {
            if !killed.is_empty() {
                tracing::info!("Terminated {} blocked process(es)", killed.len());
            }
        }
        Ok(Ok(Err(e))) => tracing::error!("Enforcement tick failed: {}", e),
        Ok(Err(e)) => tracing::error!("Enforcement tick panicked: {}", e),
        // The tick keeps running on the blocking pool; its lock makes the next one skip
        Err(_) => tracing::warn!("Enforcement tick exceeded {:?}", timeout),
    }
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending::<()>().await;
}
