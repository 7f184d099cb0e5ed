#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Engine-agnostic reconciliation interfaces and DTOs for debrid-backed
//! downloads.
//!
//! Layout: `model.rs` (persisted records and wire DTOs), `error.rs` (the
//! debrid error taxonomy), `provider.rs` (seams towards the HTTP client and
//! the persistence gateway), `reconcile.rs` (the per-user reconciliation
//! engine).

pub mod error;
pub mod model;
pub mod provider;
pub mod reconcile;

pub use error::{DebridError, DebridResult};
pub use model::{DownloadRecord, ReconcileOutcome, TorrentInfo, Unrestricted, UserDownloads};
pub use provider::{DebridProvider, DownloadRepository};
pub use reconcile::ReconcileEngine;
