//! Process-wide reconciliation counters.

use std::time::Duration;

/// Cycles between rollup summaries; windowed counters reset afterwards.
pub const ROLLUP_EVERY: u64 = 10;

/// Observational counters for the worker. Initialised at process start,
/// mutated every cycle, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Cycles started since process start, including aborted ones.
    pub cycle_count: u64,
    /// Users with downloads seen in the most recent cycle.
    pub total_users: usize,
    /// Active downloads seen in the most recent cycle.
    pub total_active_downloads: usize,
    /// Completions since the last rollup.
    pub completed_downloads: usize,
    /// Removals since the last rollup.
    pub removed_downloads: usize,
    /// Per-record failures since the last rollup.
    pub errors: usize,
    /// Duration of the most recent cycle.
    pub last_cycle_duration: Duration,
}

impl CycleStats {
    /// Count a new cycle and return its sequence number.
    pub fn begin_cycle(&mut self) -> u64 {
        self.cycle_count += 1;
        self.cycle_count
    }

    /// Fold one finished cycle into the counters.
    pub fn record_cycle(
        &mut self,
        users: usize,
        active_downloads: usize,
        completed: usize,
        removed: usize,
        errors: usize,
        duration: Duration,
    ) {
        self.total_users = users;
        self.total_active_downloads = active_downloads;
        self.completed_downloads += completed;
        self.removed_downloads += removed;
        self.errors += errors;
        self.last_cycle_duration = duration;
    }

    /// Whether the current cycle closes a rollup window.
    #[must_use]
    pub const fn rollup_due(&self) -> bool {
        self.cycle_count > 0 && self.cycle_count % ROLLUP_EVERY == 0
    }

    /// Clear the windowed counters after a rollup summary.
    pub fn reset_window(&mut self) {
        self.completed_downloads = 0;
        self.removed_downloads = 0;
        self.errors = 0;
    }
}
