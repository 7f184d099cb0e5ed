//! Typed worker settings loaded from the environment.

use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, Result};

/// Public REST base of the Real-Debrid API, used when no override is given.
pub const DEFAULT_DEBRID_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

/// Reconciliation interval when `DOWNPOUR_POLL_INTERVAL_MS` is unset.
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Quiet period collapsing a notification burst into one cycle request.
const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
/// Delay before re-establishing a dropped LISTEN connection.
const DEFAULT_LISTEN_RECONNECT_MS: u64 = 5_000;
/// Time an in-flight cycle is given to finish on shutdown.
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Validated process configuration for the download worker.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Postgres connection string.
    pub database_url: String,
    /// Bearer credential for the debrid API.
    pub debrid_token: String,
    /// Base URL of the debrid REST API.
    pub debrid_base_url: Url,
    /// Fixed interval between reconciliation cycles.
    pub poll_interval: Duration,
    /// Debounce window applied to queue notifications.
    pub debounce_delay: Duration,
    /// Delay between LISTEN reconnection attempts.
    pub listen_reconnect_delay: Duration,
    /// Grace period granted to an in-flight cycle on shutdown.
    pub shutdown_grace: Duration,
}

impl Settings {
    /// Load settings from `DOWNPOUR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value fails
    /// validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = require(&lookup, "DOWNPOUR_DATABASE_URL")?;
        let debrid_token = require(&lookup, "DOWNPOUR_DEBRID_TOKEN")?;

        let base_url_value = lookup("DOWNPOUR_DEBRID_BASE_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEBRID_BASE_URL.to_string());
        let debrid_base_url =
            Url::parse(&base_url_value).map_err(|_| ConfigError::InvalidField {
                field: "debrid_base_url",
                value: base_url_value,
                reason: "not_a_url",
            })?;

        Ok(Self {
            database_url,
            debrid_token,
            debrid_base_url,
            poll_interval: duration_ms(
                &lookup,
                "DOWNPOUR_POLL_INTERVAL_MS",
                "poll_interval",
                DEFAULT_POLL_INTERVAL_MS,
            )?,
            debounce_delay: duration_ms(
                &lookup,
                "DOWNPOUR_DEBOUNCE_MS",
                "debounce_delay",
                DEFAULT_DEBOUNCE_MS,
            )?,
            listen_reconnect_delay: duration_ms(
                &lookup,
                "DOWNPOUR_LISTEN_RECONNECT_MS",
                "listen_reconnect_delay",
                DEFAULT_LISTEN_RECONNECT_MS,
            )?,
            shutdown_grace: duration_ms(
                &lookup,
                "DOWNPOUR_SHUTDOWN_GRACE_MS",
                "shutdown_grace",
                DEFAULT_SHUTDOWN_GRACE_MS,
            )?,
        })
    }
}

fn require<F>(lookup: &F, name: &'static str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnv { name })
}

fn duration_ms<F>(
    lookup: &F,
    name: &'static str,
    field: &'static str,
    default: u64,
) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name).filter(|value| !value.trim().is_empty()) else {
        return Ok(Duration::from_millis(default));
    };
    let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidField {
        field,
        value: raw.clone(),
        reason: "not_a_number",
    })?;
    if millis == 0 {
        return Err(ConfigError::InvalidField {
            field,
            value: raw,
            reason: "zero",
        });
    }
    Ok(Duration::from_millis(millis))
}
