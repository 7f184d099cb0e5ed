//! Seams between the reconciliation engine and its collaborators.

use async_trait::async_trait;

use crate::error::DebridResult;
use crate::model::{DownloadRecord, TorrentInfo, Unrestricted, UserDownloads};

/// Typed boundary over the remote debrid-caching service.
#[async_trait]
pub trait DebridProvider: Send + Sync {
    /// Whether the provider holds a usable credential.
    fn is_configured(&self) -> bool;

    /// Fetch live state for a torrent by its upstream id.
    async fn torrent_info(&self, id: &str) -> DebridResult<TorrentInfo>;

    /// Delete a torrent upstream. Idempotent from the caller's perspective:
    /// an `UnknownResource` reply means the resource is already gone.
    async fn delete_torrent(&self, id: &str) -> DebridResult<()>;

    /// Convert a one-time restricted URL into a direct download URL.
    async fn unrestrict_link(&self, link: &str) -> DebridResult<Unrestricted>;
}

/// Minimal persistence gateway over the relational store.
#[async_trait]
pub trait DownloadRepository: Send + Sync {
    /// Verify the store is reachable.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Load every user owning a non-empty download collection.
    async fn list_users_with_downloads(&self) -> anyhow::Result<Vec<UserDownloads>>;

    /// Atomically replace a user's download collection.
    async fn replace_user_downloads(
        &self,
        username: &str,
        downloads: &[DownloadRecord],
    ) -> anyhow::Result<()>;

    /// Remove a single record by its debrid id.
    async fn delete_download(&self, username: &str, download_id: &str) -> anyhow::Result<()>;
}
