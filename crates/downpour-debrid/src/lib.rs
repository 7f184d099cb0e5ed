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

//! Typed HTTP client for a Real-Debrid-compatible caching service.
//!
//! All failure classification happens here, once, at the boundary: callers
//! receive `UnknownResource`, `RateLimited`, or `Transient` and never parse
//! status codes or error bodies themselves. The client also governs its own
//! request rate through an injected [`RateLimiter`] and retries explicit
//! rate-limit responses with bounded exponential backoff.

pub mod client;
pub mod magnet;
pub mod rate_limit;

pub use client::{DebridClient, RetryPolicy};
pub use magnet::extract_magnet_hash;
pub use rate_limit::RateLimiter;
