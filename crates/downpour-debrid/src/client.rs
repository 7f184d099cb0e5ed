//! Reqwest-backed client with boundary error classification.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use downpour_core::{DebridError, DebridProvider, DebridResult, TorrentInfo, Unrestricted};

use crate::rate_limit::RateLimiter;

/// Upstream error code for a resource the service no longer knows.
const CODE_UNKNOWN_RESOURCE: i64 = 7;
/// Upstream error code for an exhausted request-rate budget.
const CODE_RATE_LIMITED: i64 = 34;
/// Error-message fragments that also signal a missing resource.
const UNKNOWN_RESOURCE_MARKERS: [&str; 2] = ["unknown_ressource", "unknown_resource"];

/// Timeout applied to every request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded exponential backoff applied to explicit rate-limit responses.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles on every further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay_for(self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt)
    }

    const fn attempts(self) -> u32 {
        self.max_retries + 1
    }
}

/// Typed HTTP client for a Real-Debrid-compatible REST API.
///
/// Cloning shares the connection pool, the bearer credential, and the
/// injected [`RateLimiter`] window.
#[derive(Clone)]
pub struct DebridClient {
    http: Client,
    base: String,
    token: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

/// Error body shape used by the upstream API.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

impl DebridClient {
    /// Build a client against `base_url` using the given bearer credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(
        base_url: &Url,
        token: impl Into<String>,
        limiter: RateLimiter,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build debrid HTTP client")?;

        Ok(Self {
            http,
            base: base_url.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
            limiter,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy; tests use tight delays.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether the client holds a non-empty credential.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Fetch live state for a torrent.
    ///
    /// # Errors
    ///
    /// `UnknownResource` when upstream no longer knows the id, `RateLimited`
    /// once retries are exhausted, `Transient` for any other failure.
    pub async fn torrent_info(&self, id: &str) -> DebridResult<TorrentInfo> {
        self.request_json(
            "torrents.info",
            Method::GET,
            format!("{}/torrents/info/{id}", self.base),
            None,
        )
        .await
    }

    /// Delete a torrent upstream.
    ///
    /// # Errors
    ///
    /// `UnknownResource` when the torrent is already gone (callers treat
    /// that as success), otherwise as classified by the boundary.
    pub async fn delete_torrent(&self, id: &str) -> DebridResult<()> {
        self.request_empty(
            "torrents.delete",
            Method::DELETE,
            format!("{}/torrents/delete/{id}", self.base),
            None,
        )
        .await
    }

    /// Convert a restricted link into a direct download URL.
    ///
    /// # Errors
    ///
    /// As classified by the boundary; unrestriction has no special cases.
    pub async fn unrestrict_link(&self, link: &str) -> DebridResult<Unrestricted> {
        self.request_json(
            "unrestrict.link",
            Method::POST,
            format!("{}/unrestrict/link", self.base),
            Some(&[("link", link)]),
        )
        .await
    }

    /// Admit a magnet link and select all of its files.
    ///
    /// A torrent whose files cannot be selected is considered invalid: it is
    /// deleted again upstream and the call fails.
    ///
    /// # Errors
    ///
    /// `Transient` for a non-magnet URI or an invalid torrent, otherwise as
    /// classified by the boundary.
    pub async fn add_magnet(&self, magnet: &str) -> DebridResult<TorrentInfo> {
        if !magnet.starts_with("magnet:") {
            return Err(DebridError::Transient {
                detail: "invalid magnet link".to_string(),
            });
        }

        let added: TorrentInfo = self
            .request_json(
                "torrents.add_magnet",
                Method::POST,
                format!("{}/torrents/addMagnet", self.base),
                Some(&[("magnet", magnet)]),
            )
            .await?;

        if let Err(err) = self.select_all_files(&added.id).await {
            warn!(
                error = %err,
                torrent = %added.id,
                "file selection failed for fresh torrent, deleting it"
            );
            if let Err(delete_err) = self.delete_torrent(&added.id).await
                && !delete_err.is_unknown_resource()
            {
                warn!(
                    error = %delete_err,
                    torrent = %added.id,
                    "failed to delete invalid torrent"
                );
            }
            return Err(DebridError::Transient {
                detail: "invalid torrent".to_string(),
            });
        }

        Ok(added)
    }

    /// Select every file of a torrent for download.
    ///
    /// # Errors
    ///
    /// As classified by the boundary.
    pub async fn select_all_files(&self, id: &str) -> DebridResult<()> {
        self.request_empty(
            "torrents.select_files",
            Method::POST,
            format!("{}/torrents/selectFiles/{id}", self.base),
            Some(&[("files", "all")]),
        )
        .await
    }

    /// List every torrent known upstream for this account.
    ///
    /// # Errors
    ///
    /// As classified by the boundary.
    pub async fn list_torrents(&self) -> DebridResult<Vec<TorrentInfo>> {
        self.request_json(
            "torrents.list",
            Method::GET,
            format!("{}/torrents", self.base),
            None,
        )
        .await
    }

    /// Find already-admitted torrents sharing an info-hash.
    ///
    /// Lookup failures are logged and yield an empty list so duplicate
    /// detection never blocks an admission.
    pub async fn find_torrents_by_hash(&self, hash: &str) -> Vec<TorrentInfo> {
        let needle = hash.trim().to_lowercase();
        match self.list_torrents().await {
            Ok(torrents) => torrents
                .into_iter()
                .filter(|torrent| {
                    !torrent.hash.is_empty() && torrent.hash.trim().to_lowercase() == needle
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "failed to list torrents for hash lookup");
                Vec::new()
            }
        }
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        url: String,
        form: Option<&[(&str, &str)]>,
    ) -> DebridResult<T> {
        let (_, body) = self.send(operation, method, &url, form).await?;
        serde_json::from_str(&body).map_err(|err| DebridError::Transient {
            detail: format!("{operation}: invalid response body: {err}"),
        })
    }

    async fn request_empty(
        &self,
        operation: &'static str,
        method: Method,
        url: String,
        form: Option<&[(&str, &str)]>,
    ) -> DebridResult<()> {
        self.send(operation, method, &url, form).await.map(|_| ())
    }

    /// Issue one governed request, retrying explicit rate-limit responses.
    ///
    /// Classification precedence: unknown-resource > rate-limited > HTTP
    /// failure > network failure. A single response can carry ambiguous
    /// signals (a 429 whose body names a missing resource), so the order is
    /// decided here, once.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        form: Option<&[(&str, &str)]>,
    ) -> DebridResult<(StatusCode, String)> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&self.token);
            if let Some(form) = form {
                request = request.form(form);
            }

            let response = request.send().await.map_err(|err| DebridError::Transient {
                detail: format!("{operation}: {err}"),
            })?;
            let status = response.status();
            let body = response.text().await.map_err(|err| DebridError::Transient {
                detail: format!("{operation}: failed to read response body: {err}"),
            })?;
            let api_error = parse_error_body(&body);

            if let Some(message) = unknown_resource_message(api_error.as_ref()) {
                return Err(DebridError::UnknownResource { message });
            }

            let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
                || api_error.as_ref().and_then(|body| body.error_code)
                    == Some(CODE_RATE_LIMITED);
            if rate_limited {
                if attempt < self.retry.max_retries {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "debrid rate limit hit, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(DebridError::RateLimited {
                    attempts: self.retry.attempts(),
                });
            }

            if !status.is_success() {
                let detail = api_error
                    .and_then(|body| body.error)
                    .unwrap_or_else(|| format!("request failed with status {status}"));
                return Err(DebridError::Transient {
                    detail: format!("{operation}: {detail}"),
                });
            }

            return Ok((status, body));
        }
    }
}

#[async_trait]
impl DebridProvider for DebridClient {
    fn is_configured(&self) -> bool {
        Self::is_configured(self)
    }

    async fn torrent_info(&self, id: &str) -> DebridResult<TorrentInfo> {
        Self::torrent_info(self, id).await
    }

    async fn delete_torrent(&self, id: &str) -> DebridResult<()> {
        Self::delete_torrent(self, id).await
    }

    async fn unrestrict_link(&self, link: &str) -> DebridResult<Unrestricted> {
        Self::unrestrict_link(self, link).await
    }
}

fn parse_error_body(body: &str) -> Option<ApiErrorBody> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

fn unknown_resource_message(body: Option<&ApiErrorBody>) -> Option<String> {
    let body = body?;
    if body.error_code == Some(CODE_UNKNOWN_RESOURCE) {
        return Some(
            body.error
                .clone()
                .unwrap_or_else(|| "resource not found".to_string()),
        );
    }
    let message = body.error.as_deref()?;
    let lowered = message.to_lowercase();
    UNKNOWN_RESOURCE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
        .then(|| message.to_string())
}
