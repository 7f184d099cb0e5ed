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

//! Binary entrypoint for the download reconciliation worker.

use downpour_app::{AppResult, run_worker};

/// Bootstraps the worker and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_worker().await
}
