//! Database-backed gateway for per-user download collections.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row, types::Json};
use tracing::debug;

use downpour_core::{DownloadRecord, DownloadRepository, UserDownloads};

use crate::error::{DataError, Result};
use crate::listener::DOWNLOADS_CHANNEL;

const SELECT_USERS_WITH_DOWNLOADS: &str = r"
    SELECT username, downloads
    FROM users
    WHERE downloads IS NOT NULL AND jsonb_array_length(downloads) > 0
";

const UPDATE_USER_DOWNLOADS: &str = r"
    UPDATE users SET downloads = $2 WHERE username = $1
";

const DELETE_DOWNLOAD_BY_ID: &str = r"
    UPDATE users
    SET downloads = COALESCE(
        (SELECT jsonb_agg(elem) FROM jsonb_array_elements(downloads) elem WHERE elem->>'id' <> $2),
        '[]'::jsonb
    )
    WHERE username = $1
";

const UPSERT_USER_DOWNLOADS: &str = r"
    INSERT INTO users (username, downloads)
    VALUES ($1, $2)
    ON CONFLICT (username) DO UPDATE SET downloads = EXCLUDED.downloads
";

/// Database-backed repository for download sets.
#[derive(Clone)]
pub struct DownloadStore {
    pool: PgPool,
}

impl DownloadStore {
    /// Initialise the store over an existing pool, applying pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail to run.
    pub async fn new(pool: PgPool) -> Result<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Establish a connection pool and initialise the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or migrations fail.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.connect",
                source,
            })?;
        Self::new(pool).await
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Verify the database answers a trivial query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn check_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.check_connection",
                source,
            })?;
        Ok(())
    }

    /// Load every user owning a non-empty download collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored document cannot be
    /// decoded.
    pub async fn users_with_downloads(&self) -> Result<Vec<UserDownloads>> {
        let rows = sqlx::query(SELECT_USERS_WITH_DOWNLOADS)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.users_with_downloads",
                source,
            })?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let username: String =
                row.try_get("username")
                    .map_err(|source| DataError::QueryFailed {
                        operation: "store.users_with_downloads",
                        source,
                    })?;
            let document: Value =
                row.try_get("downloads")
                    .map_err(|source| DataError::QueryFailed {
                        operation: "store.users_with_downloads",
                        source,
                    })?;
            let downloads: Vec<DownloadRecord> = serde_json::from_value(document)
                .map_err(|source| DataError::DecodeFailed {
                    username: username.clone(),
                    source,
                })?;
            users.push(UserDownloads {
                username,
                downloads,
            });
        }
        Ok(users)
    }

    /// Atomically replace one user's download collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_user_downloads(
        &self,
        username: &str,
        downloads: &[DownloadRecord],
    ) -> Result<()> {
        sqlx::query(UPDATE_USER_DOWNLOADS)
            .bind(username)
            .bind(Json(downloads))
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.update_user_downloads",
                source,
            })?;
        debug!(user = %username, count = downloads.len(), "persisted download set");
        Ok(())
    }

    /// Remove a single record from a user's collection by its debrid id.
    ///
    /// Used by the request-handling layer for explicit user deletes; the
    /// reconciliation path removes records through the batched replace-write.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn delete_download(&self, username: &str, download_id: &str) -> Result<()> {
        sqlx::query(DELETE_DOWNLOAD_BY_ID)
            .bind(username)
            .bind(download_id)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.delete_download",
                source,
            })?;
        Ok(())
    }

    /// Create or overwrite a user row with the given download set.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_user(&self, username: &str, downloads: &[DownloadRecord]) -> Result<()> {
        sqlx::query(UPSERT_USER_DOWNLOADS)
            .bind(username)
            .bind(Json(downloads))
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.upsert_user",
                source,
            })?;
        Ok(())
    }

    /// Announce freshly queued downloads on the notification channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the notify call fails.
    pub async fn notify_downloads_queued(&self, payload: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(DOWNLOADS_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.notify_downloads_queued",
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl DownloadRepository for DownloadStore {
    async fn ping(&self) -> anyhow::Result<()> {
        self.check_connection().await?;
        Ok(())
    }

    async fn list_users_with_downloads(&self) -> anyhow::Result<Vec<UserDownloads>> {
        Ok(self.users_with_downloads().await?)
    }

    async fn replace_user_downloads(
        &self,
        username: &str,
        downloads: &[DownloadRecord],
    ) -> anyhow::Result<()> {
        self.update_user_downloads(username, downloads).await?;
        Ok(())
    }

    async fn delete_download(&self, username: &str, download_id: &str) -> anyhow::Result<()> {
        Self::delete_download(self, username, download_id).await?;
        Ok(())
    }
}
