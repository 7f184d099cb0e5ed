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

//! Environment-derived settings for the download worker.
//!
//! Every knob arrives through `DOWNPOUR_*` variables; missing credentials or
//! malformed values fail loudly before any work starts.

pub mod error;
pub mod settings;

pub use error::{ConfigError, Result as ConfigResult};
pub use settings::{DEFAULT_DEBRID_BASE_URL, Settings};
