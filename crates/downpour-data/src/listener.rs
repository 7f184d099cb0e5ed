//! LISTEN/NOTIFY subscription for freshly queued downloads.

use sqlx::postgres::PgListener;

use crate::error::{DataError, Result};

/// Channel the queueing layer notifies after appending a download.
pub const DOWNLOADS_CHANNEL: &str = "downpour_downloads_queued";

/// One message received from the downloads channel.
#[derive(Debug, Clone)]
pub struct QueueNotification {
    /// Channel the message arrived on.
    pub channel: String,
    /// Free-form payload supplied by the notifier, possibly empty.
    pub payload: String,
}

/// Dedicated LISTEN connection for the downloads channel.
pub struct QueueListener {
    listener: PgListener,
}

impl QueueListener {
    /// Open a LISTEN connection and subscribe to the downloads channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the LISTEN command fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut listener =
            PgListener::connect(database_url)
                .await
                .map_err(|source| DataError::ListenFailed {
                    operation: "listener.connect",
                    source,
                })?;
        listener
            .listen(DOWNLOADS_CHANNEL)
            .await
            .map_err(|source| DataError::ListenFailed {
                operation: "listener.listen",
                source,
            })?;
        Ok(Self { listener })
    }

    /// Wait for the next notification.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying connection drops; callers are
    /// expected to reconnect.
    pub async fn recv(&mut self) -> Result<QueueNotification> {
        let notification =
            self.listener
                .recv()
                .await
                .map_err(|source| DataError::ListenFailed {
                    operation: "listener.recv",
                    source,
                })?;
        Ok(QueueNotification {
            channel: notification.channel().to_string(),
            payload: notification.payload().to_string(),
        })
    }

    /// Unsubscribe from the downloads channel before shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the UNLISTEN command fails.
    pub async fn unlisten(&mut self) -> Result<()> {
        self.listener
            .unlisten(DOWNLOADS_CHANNEL)
            .await
            .map_err(|source| DataError::ListenFailed {
                operation: "listener.unlisten",
                source,
            })
    }
}
