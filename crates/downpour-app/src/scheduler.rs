//! Single-flight cycle scheduling over concurrent per-user reconciliation.
//!
//! Any number of producers (interval ticks, debounced notifications, the
//! startup pass) may request a cycle; at most one runs at a time and
//! contended requests are dropped, never queued. This bounds the load on the
//! debrid API to one cycle's worth regardless of trigger frequency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use downpour_core::{DebridProvider, DownloadRepository, ReconcileEngine, UserDownloads};
use downpour_telemetry::Metrics;

use crate::stats::CycleStats;

/// Poll step while waiting for an in-flight cycle to drain.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// What prompted a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// The initial pass before the interval loop starts.
    Startup,
    /// A fixed-interval tick.
    Interval,
    /// A debounced queue notification.
    Notification,
}

impl CycleTrigger {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Interval => "interval",
            Self::Notification => "notification",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleTally {
    completed: usize,
    removed: usize,
    errors: usize,
}

/// Runs reconciliation cycles with mutual exclusion across triggers and
/// fan-out concurrency across users.
pub struct CycleRunner {
    engine: Arc<ReconcileEngine>,
    provider: Arc<dyn DebridProvider>,
    repository: Arc<dyn DownloadRepository>,
    metrics: Metrics,
    stats: Mutex<CycleStats>,
    running: AtomicBool,
    shutdown: AtomicBool,
}

impl CycleRunner {
    /// Construct a runner over the given provider and persistence gateway.
    #[must_use]
    pub fn new(
        provider: Arc<dyn DebridProvider>,
        repository: Arc<dyn DownloadRepository>,
        metrics: Metrics,
    ) -> Self {
        let engine = Arc::new(ReconcileEngine::new(
            Arc::clone(&provider),
            Arc::clone(&repository),
        ));
        Self {
            engine,
            provider,
            repository,
            metrics,
            stats: Mutex::new(CycleStats::default()),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Refuse all further cycles; in-flight work is unaffected.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run one reconciliation cycle unless one is already in flight.
    ///
    /// Returns `false` when the request was dropped, either because the
    /// worker is shutting down or because another cycle holds the slot.
    pub async fn request_cycle(&self, trigger: CycleTrigger) -> bool {
        if self.is_shutting_down() {
            debug!(trigger = trigger.as_str(), "worker shutting down, refusing cycle");
            return false;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                trigger = trigger.as_str(),
                "cycle already in progress, dropping trigger"
            );
            self.metrics.inc_cycle_dropped();
            return false;
        }

        self.run_cycle(trigger).await;
        self.running.store(false, Ordering::Release);
        true
    }

    /// Wait for an in-flight cycle to finish, up to the grace period.
    ///
    /// Returns `false` if the cycle was still running when the grace period
    /// elapsed.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.running.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        true
    }

    /// Copy of the process-wide counters.
    ///
    /// # Panics
    ///
    /// Panics if the stats mutex has been poisoned.
    #[must_use]
    pub fn stats_snapshot(&self) -> CycleStats {
        self.stats.lock().expect("stats mutex poisoned").clone()
    }

    async fn run_cycle(&self, trigger: CycleTrigger) {
        let started = Instant::now();
        let cycle = self
            .stats
            .lock()
            .expect("stats mutex poisoned")
            .begin_cycle();
        self.metrics.inc_cycle(trigger.as_str());

        if let Err(err) = self.repository.ping().await {
            warn!(error = %err, cycle, "persistence unreachable, skipping cycle");
            return;
        }
        if !self.provider.is_configured() {
            error!(cycle, "debrid credential missing, skipping cycle");
            return;
        }

        let users = match self.repository.list_users_with_downloads().await {
            Ok(users) => users,
            Err(err) => {
                warn!(error = %err, cycle, "failed to load download sets, skipping cycle");
                return;
            }
        };

        if users.is_empty() {
            debug!(cycle, "no users with downloads");
            self.complete_cycle(cycle, trigger, started, 0, 0, CycleTally::default());
            return;
        }

        let user_count = users.len();
        let active_downloads: usize = users.iter().map(UserDownloads::active_count).sum();
        info!(
            cycle,
            trigger = trigger.as_str(),
            users = user_count,
            active = active_downloads,
            "starting reconciliation cycle"
        );

        let mut tasks = JoinSet::new();
        for user in users {
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let outcome = engine
                    .reconcile_user(&user.username, &user.downloads)
                    .await;
                (user.username, outcome)
            });
        }

        let mut tally = CycleTally::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => {
                    tally.completed += outcome.completed;
                    tally.removed += outcome.removed;
                    tally.errors += outcome.errors;
                }
                Ok((username, Err(err))) => {
                    warn!(error = %err, user = %username, cycle, "user reconciliation failed");
                    tally.errors += 1;
                }
                Err(err) => {
                    warn!(error = %err, cycle, "user reconciliation task aborted");
                    tally.errors += 1;
                }
            }
        }

        self.complete_cycle(cycle, trigger, started, user_count, active_downloads, tally);
    }

    fn complete_cycle(
        &self,
        cycle: u64,
        trigger: CycleTrigger,
        started: Instant,
        users: usize,
        active_downloads: usize,
        tally: CycleTally,
    ) {
        let duration = started.elapsed();

        self.metrics.add_completed(tally.completed);
        self.metrics.add_removed(tally.removed);
        self.metrics.add_errors(tally.errors);
        self.metrics
            .set_users(i64::try_from(users).unwrap_or(i64::MAX));
        self.metrics
            .set_active_downloads(i64::try_from(active_downloads).unwrap_or(i64::MAX));
        self.metrics.observe_cycle_duration(duration);

        let mut stats = self.stats.lock().expect("stats mutex poisoned");
        stats.record_cycle(
            users,
            active_downloads,
            tally.completed,
            tally.removed,
            tally.errors,
            duration,
        );

        info!(
            cycle,
            trigger = trigger.as_str(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            completed = tally.completed,
            removed = tally.removed,
            errors = tally.errors,
            "reconciliation cycle finished"
        );

        if stats.rollup_due() {
            info!(
                cycles = stats.cycle_count,
                completed = stats.completed_downloads,
                removed = stats.removed_downloads,
                errors = stats.errors,
                last_cycle_ms =
                    u64::try_from(stats.last_cycle_duration.as_millis()).unwrap_or(u64::MAX),
                "rollup summary"
            );
            stats.reset_window();
        }
    }
}
