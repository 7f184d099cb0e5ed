//! Persisted download records and the upstream DTOs they are reconciled
//! against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host marker recognised in an already-unrestricted direct link.
///
/// Legacy records predate the [`DownloadRecord::resolved`] flag and can only
/// be identified by this substring; both signals are honoured.
pub const RESOLVED_HOST_MARKER: &str = "real-debrid.com";

/// One user-visible queued or completed download.
///
/// Records are stored as semi-structured JSON documents, so every field
/// tolerates absence; the debrid service owns `id` and refines `filename`,
/// `progress`, `status` and `link` as the torrent advances upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRecord {
    /// Identifier assigned by the debrid service; empty until admitted.
    pub id: String,
    /// Display name, refined as upstream resolves it.
    pub filename: String,
    /// Percent complete, 0–100. Upstream may regress it; tolerated.
    pub progress: u8,
    /// Upstream lifecycle label (`queued`, `downloading`, `downloaded`, ...).
    pub status: String,
    /// Empty until completion, then restricted or direct download URL.
    pub link: String,
    /// Content-addressing key used for duplicate detection.
    pub hash: String,
    /// Correlates the record back to the originating search result.
    pub guid: String,
    /// Live download rate in bytes per second, when upstream reports one.
    pub speed: Option<u64>,
    /// Live seeder count, when upstream reports one.
    pub seeders: Option<u64>,
    /// Timestamp recorded when the download was queued.
    pub added: Option<DateTime<Utc>>,
    /// Set once `link` holds the product of a successful unrestriction.
    pub resolved: bool,
}

impl DownloadRecord {
    /// Whether the record still needs upstream polling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.progress < 100 && !self.id.is_empty()
    }

    /// Whether `link` already points at an unrestricted direct URL.
    ///
    /// Checks the explicit flag first and falls back to the host marker for
    /// records persisted before the flag existed.
    #[must_use]
    pub fn link_is_resolved(&self) -> bool {
        self.resolved || self.link.contains(RESOLVED_HOST_MARKER)
    }
}

/// The ordered download collection owned by a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDownloads {
    /// Owning username; download sets are never merged across users.
    pub username: String,
    /// The user's records, in queue order.
    pub downloads: Vec<DownloadRecord>,
}

impl UserDownloads {
    /// Number of records still requiring upstream polling.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.downloads
            .iter()
            .filter(|record| record.is_active())
            .count()
    }
}

/// Aggregate counters produced by one per-user reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Records in the merged output set.
    pub updated: usize,
    /// Downloads that crossed the completion transition this pass.
    pub completed: usize,
    /// Records dropped because upstream no longer knows their id.
    pub removed: usize,
    /// Records retained with an error status after a transient failure.
    pub errors: usize,
}

/// Live torrent state as reported by the debrid service.
///
/// The wire shape is a black-box contract with the upstream API; unknown
/// fields are ignored and missing fields default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentInfo {
    /// Upstream torrent identifier.
    pub id: String,
    /// Resolved torrent filename.
    pub filename: String,
    /// Info-hash in lowercase hex.
    pub hash: String,
    /// Total size in bytes.
    pub bytes: u64,
    /// Percent complete as reported upstream.
    pub progress: f64,
    /// Upstream lifecycle label.
    pub status: String,
    /// Upstream admission timestamp, verbatim.
    pub added: String,
    /// Restricted links, populated once the torrent completes.
    pub links: Vec<String>,
    /// Current download rate in bytes per second.
    pub speed: Option<u64>,
    /// Current seeder count.
    pub seeders: Option<u64>,
}

impl TorrentInfo {
    /// Upstream progress truncated into the 0–100 record range.
    ///
    /// Truncation, not rounding: 100 is reported only once upstream has
    /// genuinely finished, so a record at 99.x keeps polling instead of
    /// settling without its completion side effects.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        if self.progress <= 0.0 {
            0
        } else if self.progress >= 100.0 {
            100
        } else {
            self.progress as u8
        }
    }
}

/// Response of a successful link unrestriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Unrestricted {
    /// Upstream identifier of the unrestricted file.
    pub id: String,
    /// Resolved filename.
    pub filename: String,
    /// Canonical (possibly still hoster-side) link.
    pub link: String,
    /// Generated direct download URL.
    pub download: String,
    /// Hoster the link resolves through.
    pub host: String,
}

impl Unrestricted {
    /// The URL callers should persist: the direct download when present,
    /// otherwise the canonical link.
    #[must_use]
    pub fn direct_link(&self) -> &str {
        if self.download.is_empty() {
            &self.link
        } else {
            &self.download
        }
    }
}
