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

//! Persistence gateway for per-user download collections.
//!
//! Download sets live as JSONB arrays on the `users` table; this crate owns
//! the queries, the embedded migrations, and the LISTEN/NOTIFY channel that
//! announces freshly queued downloads to the worker.

pub mod error;
pub mod listener;
pub mod store;

pub use error::{DataError, Result as DataResult};
pub use listener::{DOWNLOADS_CHANNEL, QueueListener, QueueNotification};
pub use store::DownloadStore;
