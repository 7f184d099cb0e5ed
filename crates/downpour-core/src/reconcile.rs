//! Per-user reconciliation of persisted download sets against upstream
//! truth.
//!
//! One pass merges live torrent state into a fresh output list, triggers the
//! unrestrict-on-completion side effect at most once per record, drops
//! records whose upstream resource vanished, and performs a single
//! replace-write per user when anything changed.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::DebridError;
use crate::model::{DownloadRecord, ReconcileOutcome, TorrentInfo};
use crate::provider::{DebridProvider, DownloadRepository};

/// Progress delta that earns a per-record log line.
const PROGRESS_LOG_THRESHOLD: u8 = 5;

/// Reconciles one user's download set at a time.
///
/// Per-record failures are absorbed into [`ReconcileOutcome`] counters; only
/// a repository failure escapes to the caller.
pub struct ReconcileEngine {
    provider: Arc<dyn DebridProvider>,
    repository: Arc<dyn DownloadRepository>,
}

impl ReconcileEngine {
    /// Construct an engine over the given provider and persistence gateway.
    #[must_use]
    pub fn new(provider: Arc<dyn DebridProvider>, repository: Arc<dyn DownloadRepository>) -> Self {
        Self {
            provider,
            repository,
        }
    }

    /// Bring one user's persisted download set into agreement with upstream
    /// state, in one pass, writing at most once.
    ///
    /// Settled records (progress at 100, or never admitted upstream) are kept
    /// verbatim. Active records are polled individually: live state is merged
    /// into a copy, completion triggers a single unrestriction, an unknown
    /// upstream resource drops the record after a best-effort delete, and any
    /// other failure retains the record with an `error` status.
    ///
    /// # Errors
    ///
    /// Returns an error only when the merged set cannot be persisted.
    pub async fn reconcile_user(
        &self,
        username: &str,
        downloads: &[DownloadRecord],
    ) -> Result<ReconcileOutcome> {
        if downloads.is_empty() {
            return Ok(ReconcileOutcome::default());
        }

        let mut merged = Vec::with_capacity(downloads.len());
        let mut completed = 0;
        let mut removed = 0;
        let mut errors = 0;

        for record in downloads {
            if !record.is_active() {
                merged.push(record.clone());
                continue;
            }

            match self.provider.torrent_info(&record.id).await {
                Ok(info) => {
                    let (next, finished) = self.merge_record(username, record, &info).await;
                    if finished {
                        completed += 1;
                    }
                    merged.push(next);
                }
                Err(err) if err.is_unknown_resource() => {
                    info!(
                        user = %username,
                        download = %record.id,
                        filename = %record.filename,
                        "removing download missing upstream"
                    );
                    self.delete_upstream(username, record).await;
                    removed += 1;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        user = %username,
                        download = %record.id,
                        "failed to poll download"
                    );
                    errors += 1;
                    let mut kept = record.clone();
                    kept.status = "error".to_string();
                    merged.push(kept);
                }
            }
        }

        let changed = merged.len() != downloads.len()
            || merged.iter().zip(downloads).any(|(next, prev)| next != prev);
        if changed {
            self.repository
                .replace_user_downloads(username, &merged)
                .await?;
        }

        Ok(ReconcileOutcome {
            updated: merged.len(),
            completed,
            removed,
            errors,
        })
    }

    /// Merge live upstream state into a copy of the record, unrestricting the
    /// first link exactly once on the completion transition.
    ///
    /// Returns the merged record and whether it completed this pass.
    async fn merge_record(
        &self,
        username: &str,
        current: &DownloadRecord,
        info: &TorrentInfo,
    ) -> (DownloadRecord, bool) {
        let mut next = current.clone();

        let upstream_progress = info.progress_percent();
        if upstream_progress != 0 {
            next.progress = upstream_progress;
        }
        if !info.status.is_empty() {
            next.status = info.status.clone();
        }
        if !info.filename.is_empty() {
            next.filename = info.filename.clone();
        }
        if let Some(first) = info.links.first() {
            next.link = first.clone();
        }
        next.speed = info.speed;
        next.seeders = info.seeders;

        let delta = next.progress.abs_diff(current.progress);
        if delta >= PROGRESS_LOG_THRESHOLD || next.progress >= 100 {
            debug!(
                user = %username,
                download = %current.id,
                from = current.progress,
                to = next.progress,
                "download progress"
            );
        }

        let mut finished = false;
        if info.progress >= 100.0
            && let Some(restricted) = info.links.first()
            && !current.link_is_resolved()
        {
            match self.provider.unrestrict_link(restricted).await {
                Ok(unrestricted) => {
                    next.link = unrestricted.direct_link().to_string();
                    next.resolved = true;
                    finished = true;
                    info!(
                        user = %username,
                        download = %current.id,
                        filename = %next.filename,
                        "download completed"
                    );
                }
                Err(err) => {
                    // Best effort only; the restricted link is kept and the
                    // record still advances.
                    warn!(
                        error = %err,
                        user = %username,
                        download = %current.id,
                        "failed to unrestrict completed download"
                    );
                }
            }
        }

        (next, finished)
    }

    /// Issue the best-effort upstream delete for a vanished resource.
    async fn delete_upstream(&self, username: &str, record: &DownloadRecord) {
        match self.provider.delete_torrent(&record.id).await {
            Ok(()) => {}
            Err(DebridError::UnknownResource { .. }) => {}
            Err(err) => {
                warn!(
                    error = %err,
                    user = %username,
                    download = %record.id,
                    "best-effort upstream delete failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DebridResult;
    use crate::model::{Unrestricted, UserDownloads};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum InfoScript {
        Live(TorrentInfo),
        Unknown,
        Transient,
    }

    struct ScriptedProvider {
        infos: HashMap<String, InfoScript>,
        direct_link: Option<String>,
        unrestrict_calls: AtomicUsize,
        deleted: Mutex<Vec<String>>,
        delete_reports_unknown: bool,
    }

    impl ScriptedProvider {
        fn new(infos: HashMap<String, InfoScript>) -> Self {
            Self {
                infos,
                direct_link: Some("https://cdn.real-debrid.com/d/direct".to_string()),
                unrestrict_calls: AtomicUsize::new(0),
                deleted: Mutex::new(Vec::new()),
                delete_reports_unknown: false,
            }
        }

        fn unrestrict_count(&self) -> usize {
            self.unrestrict_calls.load(Ordering::SeqCst)
        }

        fn deleted_ids(&self) -> Vec<String> {
            self.deleted.lock().expect("deleted mutex").clone()
        }
    }

    #[async_trait]
    impl DebridProvider for ScriptedProvider {
        fn is_configured(&self) -> bool {
            true
        }

        async fn torrent_info(&self, id: &str) -> DebridResult<TorrentInfo> {
            match self.infos.get(id) {
                Some(InfoScript::Live(info)) => Ok(info.clone()),
                Some(InfoScript::Unknown) | None => Err(DebridError::UnknownResource {
                    message: "unknown_ressource".to_string(),
                }),
                Some(InfoScript::Transient) => Err(DebridError::Transient {
                    detail: "connection timed out".to_string(),
                }),
            }
        }

        async fn delete_torrent(&self, id: &str) -> DebridResult<()> {
            self.deleted
                .lock()
                .expect("deleted mutex")
                .push(id.to_string());
            if self.delete_reports_unknown {
                Err(DebridError::UnknownResource {
                    message: "unknown_ressource".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn unrestrict_link(&self, link: &str) -> DebridResult<Unrestricted> {
            self.unrestrict_calls.fetch_add(1, Ordering::SeqCst);
            match &self.direct_link {
                Some(direct) => Ok(Unrestricted {
                    link: link.to_string(),
                    download: direct.clone(),
                    ..Unrestricted::default()
                }),
                None => Err(DebridError::Transient {
                    detail: "hoster unavailable".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingRepository {
        writes: Mutex<Vec<(String, Vec<DownloadRecord>)>>,
        fail_writes: bool,
    }

    impl RecordingRepository {
        fn written(&self) -> Vec<(String, Vec<DownloadRecord>)> {
            self.writes.lock().expect("writes mutex").clone()
        }
    }

    #[async_trait]
    impl DownloadRepository for RecordingRepository {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_users_with_downloads(&self) -> Result<Vec<UserDownloads>> {
            Ok(Vec::new())
        }

        async fn replace_user_downloads(
            &self,
            username: &str,
            downloads: &[DownloadRecord],
        ) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("connection pool closed");
            }
            self.writes
                .lock()
                .expect("writes mutex")
                .push((username.to_string(), downloads.to_vec()));
            Ok(())
        }

        async fn delete_download(&self, _username: &str, _download_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn active_record(id: &str, progress: u8) -> DownloadRecord {
        DownloadRecord {
            id: id.to_string(),
            filename: format!("{id}.mkv"),
            progress,
            status: "downloading".to_string(),
            ..DownloadRecord::default()
        }
    }

    fn completed_info(link: &str) -> TorrentInfo {
        TorrentInfo {
            progress: 100.0,
            status: "downloaded".to_string(),
            links: vec![link.to_string()],
            ..TorrentInfo::default()
        }
    }

    fn engine(
        provider: Arc<ScriptedProvider>,
        repository: Arc<RecordingRepository>,
    ) -> ReconcileEngine {
        ReconcileEngine::new(provider, repository)
    }

    #[tokio::test]
    async fn completion_transition_unrestricts_and_persists_direct_link() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t1".to_string(),
            InfoScript::Live(completed_info("http://restricted/x")),
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let outcome = engine
            .reconcile_user("alice", &[active_record("t1", 40)])
            .await?;

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(provider.unrestrict_count(), 1);

        let writes = repository.written();
        assert_eq!(writes.len(), 1);
        let (user, records) = &writes[0];
        assert_eq!(user, "alice");
        assert_eq!(records[0].progress, 100);
        assert_eq!(records[0].link, "https://cdn.real-debrid.com/d/direct");
        assert!(records[0].resolved);
        Ok(())
    }

    #[tokio::test]
    async fn second_pass_never_unrestricts_again() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t1".to_string(),
            InfoScript::Live(completed_info("http://restricted/x")),
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let first = engine
            .reconcile_user("alice", &[active_record("t1", 40)])
            .await?;
        assert_eq!(first.completed, 1);

        let persisted = repository.written().remove(0).1;
        let second = engine.reconcile_user("alice", &persisted).await?;

        assert_eq!(second.completed, 0);
        assert_eq!(provider.unrestrict_count(), 1, "no duplicate unrestriction");
        assert_eq!(repository.written().len(), 1, "no second write issued");
        Ok(())
    }

    #[tokio::test]
    async fn nearly_complete_downloads_stay_active_until_upstream_finishes() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t8".to_string(),
            InfoScript::Live(TorrentInfo {
                progress: 99.6,
                status: "downloading".to_string(),
                ..TorrentInfo::default()
            }),
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let outcome = engine
            .reconcile_user("ivy", &[active_record("t8", 95)])
            .await?;

        assert_eq!(outcome.completed, 0);
        assert_eq!(provider.unrestrict_count(), 0);
        let records = repository.written().remove(0).1;
        assert_eq!(records[0].progress, 99, "truncated, never rounded to 100");
        assert!(records[0].is_active(), "record keeps polling next cycle");
        Ok(())
    }

    #[tokio::test]
    async fn legacy_resolved_links_are_not_unrestricted() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t1".to_string(),
            InfoScript::Live(completed_info("http://restricted/x")),
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let mut record = active_record("t1", 99);
        record.link = "https://download.real-debrid.com/d/OLD".to_string();
        let outcome = engine.reconcile_user("alice", &[record]).await?;

        assert_eq!(outcome.completed, 0);
        assert_eq!(provider.unrestrict_count(), 0);
        let records = repository.written().remove(0).1;
        assert_eq!(records[0].progress, 100);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_resource_removes_record_after_best_effort_delete() -> Result<()> {
        let mut provider = ScriptedProvider::new(HashMap::from([(
            "t2".to_string(),
            InfoScript::Unknown,
        )]));
        provider.delete_reports_unknown = true;
        let provider = Arc::new(provider);
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let outcome = engine
            .reconcile_user("bob", &[active_record("t2", 60)])
            .await?;

        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.errors, 0);
        assert_eq!(provider.deleted_ids(), vec!["t2".to_string()]);

        let records = repository.written().remove(0).1;
        assert!(records.iter().all(|record| record.id != "t2"));
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_retains_record_with_error_status() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t3".to_string(),
            InfoScript::Transient,
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let outcome = engine
            .reconcile_user("carol", &[active_record("t3", 75)])
            .await?;

        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.removed, 0);
        let records = repository.written().remove(0).1;
        assert_eq!(records[0].status, "error");
        assert_eq!(records[0].progress, 75, "progress untouched on failure");
        Ok(())
    }

    #[tokio::test]
    async fn empty_set_is_a_noop() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::new()));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(provider, Arc::clone(&repository));

        let outcome = engine.reconcile_user("dave", &[]).await?;

        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(repository.written().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_set_skips_the_write() -> Result<()> {
        let record = active_record("t4", 40);
        let info = TorrentInfo {
            progress: 40.0,
            status: record.status.clone(),
            filename: record.filename.clone(),
            ..TorrentInfo::default()
        };
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t4".to_string(),
            InfoScript::Live(info),
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(provider, Arc::clone(&repository));

        let outcome = engine.reconcile_user("erin", &[record]).await?;

        assert_eq!(outcome.updated, 1);
        assert!(repository.written().is_empty(), "no persistence churn");
        Ok(())
    }

    #[tokio::test]
    async fn failed_unrestriction_still_advances_the_record() -> Result<()> {
        let mut provider = ScriptedProvider::new(HashMap::from([(
            "t5".to_string(),
            InfoScript::Live(completed_info("http://restricted/y")),
        )]));
        provider.direct_link = None;
        let provider = Arc::new(provider);
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let outcome = engine
            .reconcile_user("fred", &[active_record("t5", 90)])
            .await?;

        assert_eq!(outcome.completed, 0, "failed unrestriction is not counted");
        assert_eq!(outcome.errors, 0, "unrestriction failure is swallowed");
        let records = repository.written().remove(0).1;
        assert_eq!(records[0].progress, 100);
        assert_eq!(records[0].link, "http://restricted/y");
        assert!(!records[0].resolved);
        Ok(())
    }

    #[tokio::test]
    async fn settled_records_are_kept_verbatim() -> Result<()> {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t6".to_string(),
            InfoScript::Live(completed_info("http://restricted/z")),
        )])));
        let repository = Arc::new(RecordingRepository::default());
        let engine = engine(Arc::clone(&provider), Arc::clone(&repository));

        let mut settled = active_record("done", 100);
        settled.resolved = true;
        let unadmitted = DownloadRecord {
            filename: "pending.mkv".to_string(),
            ..DownloadRecord::default()
        };
        let active = active_record("t6", 10);

        let outcome = engine
            .reconcile_user("gina", &[settled.clone(), unadmitted.clone(), active])
            .await?;

        assert_eq!(outcome.updated, 3);
        let records = repository.written().remove(0).1;
        assert_eq!(records[0], settled);
        assert_eq!(records[1], unadmitted);
        assert_eq!(records[2].progress, 100);
        Ok(())
    }

    #[tokio::test]
    async fn repository_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::new(HashMap::from([(
            "t7".to_string(),
            InfoScript::Live(completed_info("http://restricted/w")),
        )])));
        let repository = Arc::new(RecordingRepository {
            fail_writes: true,
            ..RecordingRepository::default()
        });
        let engine = engine(provider, repository);

        let result = engine
            .reconcile_user("hank", &[active_record("t7", 40)])
            .await;
        assert!(result.is_err(), "infrastructure failures must escape");
    }
}
