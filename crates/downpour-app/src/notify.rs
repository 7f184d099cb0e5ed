//! Notification-driven fast path for freshly queued downloads.
//!
//! Two tasks cooperate: a pump that owns the LISTEN connection and forwards
//! messages into a mailbox, reconnecting when the stream drops, and a
//! debouncer that collapses a burst of messages into a single cycle request.
//! Neither ever blocks the fixed-interval scheduling path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use downpour_data::{QueueListener, QueueNotification};

use crate::scheduler::{CycleRunner, CycleTrigger};

/// Own the LISTEN connection and forward queue notifications into the
/// mailbox.
///
/// Connection failures trigger reconnection after `reconnect_delay`; a
/// shutdown signal unsubscribes the channel and ends the task.
pub async fn pump_queue_notifications(
    database_url: String,
    reconnect_delay: Duration,
    sender: mpsc::Sender<QueueNotification>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let mut listener = match QueueListener::connect(&database_url).await {
            Ok(listener) => {
                info!("listening for queued-download notifications");
                listener
            }
            Err(err) => {
                warn!(error = %err, "failed to open notification listener, retrying");
                if wait_or_shutdown(reconnect_delay, &mut shutdown).await {
                    return;
                }
                continue;
            }
        };

        loop {
            tokio::select! {
                message = listener.recv() => match message {
                    Ok(notification) => {
                        if sender.try_send(notification).is_err() {
                            debug!("notification mailbox full, message dropped");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "notification stream dropped, reconnecting");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    if let Err(err) = listener.unlisten().await {
                        warn!(error = %err, "failed to unlisten before shutdown");
                    }
                    return;
                }
            }
        }

        if wait_or_shutdown(reconnect_delay, &mut shutdown).await {
            return;
        }
    }
}

/// Collapse notification bursts into single cycle requests.
///
/// Each message (re)arms the quiet period; once it elapses with no further
/// messages one cycle is requested, subject to the runner's single-flight
/// guard. Ends when the mailbox closes.
pub async fn debounce_notifications(
    mut messages: mpsc::Receiver<QueueNotification>,
    quiet_period: Duration,
    runner: Arc<CycleRunner>,
) {
    while let Some(first) = messages.recv().await {
        debug!(payload = %first.payload, "download queued, debouncing");
        let mut mailbox_closed = false;
        loop {
            match timeout(quiet_period, messages.recv()).await {
                Ok(Some(notification)) => {
                    debug!(payload = %notification.payload, "burst continues, extending debounce");
                }
                Ok(None) => {
                    mailbox_closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        info!("requesting reconciliation cycle for queued downloads");
        runner.request_cycle(CycleTrigger::Notification).await;

        if mailbox_closed {
            return;
        }
    }
}

async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}
