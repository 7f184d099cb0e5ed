//! Worker bootstrap: fail-fast environment loading, task wiring, graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use downpour_config::Settings;
use downpour_core::{DebridProvider, DownloadRepository};
use downpour_data::DownloadStore;
use downpour_debrid::{DebridClient, RateLimiter};
use downpour_telemetry::{LoggingConfig, Metrics, init_logging};

use crate::error::{AppError, AppResult};
use crate::notify::{debounce_notifications, pump_queue_notifications};
use crate::scheduler::{CycleRunner, CycleTrigger};

/// Delay before the single startup retry when the database is unreachable.
const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Capacity of the queue-notification mailbox; the debouncer collapses
/// bursts, so overflow just drops redundant messages.
const NOTIFY_MAILBOX: usize = 64;
/// Bound on waiting for the background tasks to stop during shutdown.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Launch the download worker and block until a shutdown signal.
///
/// # Errors
///
/// Returns an error on fatal misconfiguration: missing credentials, a
/// database that stays unreachable through the startup retry, or a failed
/// telemetry install.
pub async fn run_worker() -> AppResult<()> {
    let settings = Settings::from_env().map_err(|source| AppError::Config {
        operation: "settings.from_env",
        source,
    })?;
    init_logging(&LoggingConfig::default()).map_err(|detail| AppError::Telemetry {
        operation: "telemetry.init",
        detail,
    })?;

    info!(
        poll_interval = ?settings.poll_interval,
        debounce = ?settings.debounce_delay,
        "starting download worker"
    );

    let metrics = Metrics::new().map_err(|detail| AppError::Telemetry {
        operation: "telemetry.metrics",
        detail,
    })?;
    let store = connect_store(&settings).await?;
    let client = DebridClient::new(
        &settings.debrid_base_url,
        settings.debrid_token.clone(),
        RateLimiter::new(),
    )
    .map_err(|detail| AppError::Debrid {
        operation: "debrid_client.new",
        detail,
    })?;

    let provider: Arc<dyn DebridProvider> = Arc::new(client);
    let repository: Arc<dyn DownloadRepository> = Arc::new(store.clone());
    let runner = Arc::new(CycleRunner::new(provider, repository, metrics));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_MAILBOX);

    let pump = tokio::spawn(pump_queue_notifications(
        settings.database_url.clone(),
        settings.listen_reconnect_delay,
        notify_tx,
        shutdown_rx,
    ));
    let debouncer = tokio::spawn(debounce_notifications(
        notify_rx,
        settings.debounce_delay,
        Arc::clone(&runner),
    ));

    // One pass before the interval loop so freshly queued downloads converge
    // without waiting out the first tick.
    runner.request_cycle(CycleTrigger::Startup).await;

    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately

    let shutdown_signal = wait_for_shutdown_signal();
    tokio::pin!(shutdown_signal);

    let signal = loop {
        tokio::select! {
            signal = &mut shutdown_signal => break signal,
            _ = ticker.tick() => {
                runner.request_cycle(CycleTrigger::Interval).await;
            }
        }
    };

    info!(signal, "shutting down");
    runner.begin_shutdown();
    let _ = shutdown_tx.send(true);

    if !runner.wait_idle(settings.shutdown_grace).await {
        warn!("in-flight cycle did not finish within the grace period");
        debouncer.abort();
    }

    join_or_abort("notification pump", pump).await;
    join_or_abort("debounce task", debouncer).await;

    store.pool().close().await;
    info!("worker shut down");
    Ok(())
}

/// Connect to the database, retrying once after a fixed delay before
/// giving up.
async fn connect_store(settings: &Settings) -> AppResult<DownloadStore> {
    match DownloadStore::connect(&settings.database_url).await {
        Ok(store) => Ok(store),
        Err(err) => {
            warn!(error = %err, "database unreachable at startup, retrying once");
            tokio::time::sleep(STARTUP_RETRY_DELAY).await;
            DownloadStore::connect(&settings.database_url)
                .await
                .map_err(|source| AppError::Data {
                    operation: "store.connect",
                    source,
                })
        }
    }
}

async fn join_or_abort(task: &'static str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_cancelled() => {}
        Ok(Err(err)) => warn!(error = %err, task, "task join failed"),
        Err(_) => {
            warn!(task, "task did not stop in time, aborting");
            handle.abort();
        }
    }
}

async fn wait_for_shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for interrupt signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = terminate.recv() => "SIGTERM",
                    () = interrupt => "SIGINT",
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                interrupt.await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        interrupt.await;
        "SIGINT"
    }
}
