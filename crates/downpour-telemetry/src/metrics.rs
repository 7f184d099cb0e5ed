//! Prometheus-backed metrics registry for the reconciliation worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across worker tasks.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    cycles_total: IntCounterVec,
    cycles_dropped_total: IntCounter,
    downloads_completed_total: IntCounter,
    downloads_removed_total: IntCounter,
    download_errors_total: IntCounter,
    users_last_cycle: IntGauge,
    active_downloads: IntGauge,
    cycle_duration_ms: IntGauge,
}

/// Snapshot of the worker counters for rollup logging.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Users seen in the most recent cycle.
    pub users_last_cycle: i64,
    /// Active downloads seen in the most recent cycle.
    pub active_downloads: i64,
    /// Duration of the most recent cycle in milliseconds.
    pub cycle_duration_ms: i64,
    /// Total downloads that crossed the completion transition.
    pub downloads_completed_total: u64,
    /// Total records removed after upstream reported them gone.
    pub downloads_removed_total: u64,
    /// Total per-record reconciliation failures.
    pub download_errors_total: u64,
    /// Total triggers dropped under single-flight contention.
    pub cycles_dropped_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the worker collectors
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cycles_total = IntCounterVec::new(
            Opts::new("reconcile_cycles_total", "Reconciliation cycles by trigger"),
            &["trigger"],
        )?;
        let cycles_dropped_total = IntCounter::with_opts(Opts::new(
            "reconcile_cycles_dropped_total",
            "Cycle triggers dropped while another cycle was running",
        ))?;
        let downloads_completed_total = IntCounter::with_opts(Opts::new(
            "downloads_completed_total",
            "Downloads that reached completion and were unrestricted",
        ))?;
        let downloads_removed_total = IntCounter::with_opts(Opts::new(
            "downloads_removed_total",
            "Download records removed after upstream forgot them",
        ))?;
        let download_errors_total = IntCounter::with_opts(Opts::new(
            "download_errors_total",
            "Per-record reconciliation failures",
        ))?;
        let users_last_cycle = IntGauge::with_opts(Opts::new(
            "reconcile_users_last_cycle",
            "Users with downloads seen in the last cycle",
        ))?;
        let active_downloads = IntGauge::with_opts(Opts::new(
            "reconcile_active_downloads",
            "Active downloads seen in the last cycle",
        ))?;
        let cycle_duration_ms = IntGauge::with_opts(Opts::new(
            "reconcile_cycle_duration_ms",
            "Duration of the last reconciliation cycle (ms)",
        ))?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycles_dropped_total.clone()))?;
        registry.register(Box::new(downloads_completed_total.clone()))?;
        registry.register(Box::new(downloads_removed_total.clone()))?;
        registry.register(Box::new(download_errors_total.clone()))?;
        registry.register(Box::new(users_last_cycle.clone()))?;
        registry.register(Box::new(active_downloads.clone()))?;
        registry.register(Box::new(cycle_duration_ms.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                cycles_total,
                cycles_dropped_total,
                downloads_completed_total,
                downloads_removed_total,
                download_errors_total,
                users_last_cycle,
                active_downloads,
                cycle_duration_ms,
            }),
        })
    }

    /// Count one reconciliation cycle for the given trigger label.
    pub fn inc_cycle(&self, trigger: &str) {
        self.inner
            .cycles_total
            .with_label_values(&[trigger])
            .inc();
    }

    /// Count a trigger dropped while another cycle was running.
    pub fn inc_cycle_dropped(&self) {
        self.inner.cycles_dropped_total.inc();
    }

    /// Add completions observed in one cycle.
    pub fn add_completed(&self, count: usize) {
        self.inner
            .downloads_completed_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Add removals observed in one cycle.
    pub fn add_removed(&self, count: usize) {
        self.inner
            .downloads_removed_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Add per-record failures observed in one cycle.
    pub fn add_errors(&self, count: usize) {
        self.inner
            .download_errors_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record how many users the last cycle touched.
    pub fn set_users(&self, count: i64) {
        self.inner.users_last_cycle.set(count);
    }

    /// Record how many active downloads the last cycle touched.
    pub fn set_active_downloads(&self, count: i64) {
        self.inner.active_downloads.set(count);
    }

    /// Record the duration of the last cycle.
    pub fn observe_cycle_duration(&self, duration: Duration) {
        self.inner
            .cycle_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition
    /// format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the worker counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            users_last_cycle: self.inner.users_last_cycle.get(),
            active_downloads: self.inner.active_downloads.get(),
            cycle_duration_ms: self.inner.cycle_duration_ms.get(),
            downloads_completed_total: self.inner.downloads_completed_total.get(),
            downloads_removed_total: self.inner.downloads_removed_total.get(),
            download_errors_total: self.inner.download_errors_total.get(),
            cycles_dropped_total: self.inner.cycles_dropped_total.get(),
        }
    }

    fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_snapshot() {
        let metrics = Metrics::new().expect("registry");
        metrics.inc_cycle("interval");
        metrics.inc_cycle("notify");
        metrics.inc_cycle_dropped();
        metrics.add_completed(2);
        metrics.add_removed(1);
        metrics.add_errors(3);
        metrics.set_users(4);
        metrics.set_active_downloads(9);
        metrics.observe_cycle_duration(Duration::from_millis(120));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.downloads_completed_total, 2);
        assert_eq!(snapshot.downloads_removed_total, 1);
        assert_eq!(snapshot.download_errors_total, 3);
        assert_eq!(snapshot.cycles_dropped_total, 1);
        assert_eq!(snapshot.users_last_cycle, 4);
        assert_eq!(snapshot.active_downloads, 9);
        assert_eq!(snapshot.cycle_duration_ms, 120);
    }

    #[test]
    fn render_emits_the_exposition_format() {
        let metrics = Metrics::new().expect("registry");
        metrics.inc_cycle("startup");
        let rendered = metrics.render().expect("render");
        assert!(rendered.contains("reconcile_cycles_total"));
        assert!(rendered.contains("downloads_completed_total"));
    }

    #[test]
    fn snapshot_serialises_for_rollup_logs() {
        let metrics = Metrics::new().expect("registry");
        metrics.add_completed(1);
        let json = serde_json::to_value(metrics.snapshot()).expect("json");
        assert_eq!(json["downloads_completed_total"], 1);
    }

    #[test]
    fn clones_share_one_registry() {
        let metrics = Metrics::new().expect("registry");
        let clone = metrics.clone();
        clone.add_removed(5);
        assert_eq!(metrics.snapshot().downloads_removed_total, 5);
    }

    #[test]
    fn oversized_durations_saturate() {
        assert_eq!(
            Metrics::duration_to_ms(Duration::from_secs(u64::MAX)),
            i64::MAX
        );
    }
}
