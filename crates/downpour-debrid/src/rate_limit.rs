//! Client-side request-rate governance.
//!
//! The upstream API enforces a hard per-minute request budget. The limiter
//! keeps a rolling window of recent request instants and proactively sleeps
//! before the budget is exhausted, so a burst of concurrent reconciliations
//! degrades into waiting instead of upstream 429 storms.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

/// Upstream request budget per window.
const DEFAULT_BUDGET: usize = 250;
/// Window size the budget applies to.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Occupancy at which the limiter starts sleeping pre-emptively.
const DEFAULT_SOFT_THRESHOLD: usize = 240;
/// Safety margin added on top of the computed wait.
const DEFAULT_BUFFER: Duration = Duration::from_secs(1);

/// Shared rolling-window rate limiter.
///
/// Cloning is cheap; all clones share one window, which is the point: every
/// concurrent per-user reconciliation task appends to the same history.
#[derive(Clone)]
pub struct RateLimiter {
    stamps: Arc<Mutex<VecDeque<Instant>>>,
    soft_threshold: usize,
    window: Duration,
    buffer: Duration,
}

impl RateLimiter {
    /// Limiter with the upstream service's published budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUDGET, DEFAULT_SOFT_THRESHOLD, DEFAULT_WINDOW, DEFAULT_BUFFER)
    }

    /// Limiter with an explicit budget, threshold, window, and buffer.
    ///
    /// # Panics
    ///
    /// Panics if the soft threshold exceeds the budget or either is zero.
    #[must_use]
    pub fn with_limits(
        budget: usize,
        soft_threshold: usize,
        window: Duration,
        buffer: Duration,
    ) -> Self {
        assert!(budget > 0 && soft_threshold > 0, "budget must be positive");
        assert!(soft_threshold <= budget, "threshold cannot exceed budget");
        Self {
            stamps: Arc::new(Mutex::new(VecDeque::with_capacity(budget))),
            soft_threshold,
            window,
            buffer,
        }
    }

    /// Reserve one request slot, sleeping first if the window is nearly full.
    ///
    /// # Panics
    ///
    /// Panics if the window mutex has been poisoned.
    pub async fn acquire(&self) {
        let wait = {
            let mut stamps = self.stamps.lock().expect("rate limiter mutex poisoned");
            Self::prune(&mut stamps, self.window);
            if stamps.len() >= self.soft_threshold {
                stamps
                    .front()
                    .map(|oldest| (self.window + self.buffer).saturating_sub(oldest.elapsed()))
            } else {
                None
            }
        };

        if let Some(wait) = wait
            && !wait.is_zero()
        {
            warn!(
                wait_ms = wait.as_millis() as u64,
                "approaching debrid rate limit, pausing requests"
            );
            tokio::time::sleep(wait).await;
        }

        let mut stamps = self.stamps.lock().expect("rate limiter mutex poisoned");
        Self::prune(&mut stamps, self.window);
        stamps.push_back(Instant::now());
    }

    /// Number of requests currently inside the rolling window.
    ///
    /// # Panics
    ///
    /// Panics if the window mutex has been poisoned.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        let mut stamps = self.stamps.lock().expect("rate limiter mutex poisoned");
        Self::prune(&mut stamps, self.window);
        stamps.len()
    }

    fn prune(stamps: &mut VecDeque<Instant>, window: Duration) {
        while let Some(front) = stamps.front() {
            if front.elapsed() > window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
