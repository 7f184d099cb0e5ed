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

//! Download-worker wiring: bootstrap, cycle scheduling, and the
//! notification-driven fast path.
//!
//! Layout: `bootstrap.rs` (startup and shutdown), `scheduler.rs`
//! (single-flight cycle runner), `notify.rs` (debounced LISTEN trigger),
//! `stats.rs` (process-wide counters), `error.rs` (application errors).

pub mod bootstrap;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod stats;

pub use bootstrap::run_worker;
pub use error::{AppError, AppResult};
pub use scheduler::{CycleRunner, CycleTrigger};
pub use stats::CycleStats;
