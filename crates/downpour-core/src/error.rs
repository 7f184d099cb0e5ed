//! Error taxonomy for the external debrid boundary.
//!
//! Classification happens once, inside the HTTP client; callers match on the
//! variant instead of re-parsing status codes or error bodies.

use thiserror::Error;

/// Failure classes surfaced by a debrid provider.
#[derive(Debug, Error)]
pub enum DebridError {
    /// Upstream has no record of the resource.
    ///
    /// This is a definitive deletion signal, not a retryable failure.
    #[error("unknown upstream resource")]
    UnknownResource {
        /// Upstream error message when one was provided.
        message: String,
    },
    /// The request-rate budget stayed exhausted through bounded retries.
    #[error("debrid rate limit exceeded")]
    RateLimited {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Any other upstream, HTTP, or network failure.
    ///
    /// Safe to retry on the next reconciliation cycle.
    #[error("transient debrid failure")]
    Transient {
        /// Human-readable failure detail.
        detail: String,
    },
}

impl DebridError {
    /// Whether the error is the upstream deletion signal.
    #[must_use]
    pub const fn is_unknown_resource(&self) -> bool {
        matches!(self, Self::UnknownResource { .. })
    }
}

/// Convenience alias for debrid provider results.
pub type DebridResult<T> = Result<T, DebridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_resource_is_distinguished_from_failures() {
        let gone = DebridError::UnknownResource {
            message: "unknown_ressource".to_string(),
        };
        assert!(gone.is_unknown_resource());
        assert_eq!(gone.to_string(), "unknown upstream resource");

        let throttled = DebridError::RateLimited { attempts: 4 };
        assert!(!throttled.is_unknown_resource());

        let transient = DebridError::Transient {
            detail: "connection reset".to_string(),
        };
        assert!(!transient.is_unknown_resource());
    }
}
