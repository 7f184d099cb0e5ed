use std::future::Future;

use anyhow::{Context, Result};
use downpour_core::DownloadRecord;
use downpour_data::{DOWNLOADS_CHANNEL, DownloadStore, QueueListener};
use downpour_test_support::fixtures;
use downpour_test_support::postgres::start_postgres;

async fn with_download_store<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(DownloadStore, String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let database = match start_postgres() {
        Ok(database) => database,
        Err(err) => {
            eprintln!("skipping download store tests: {err:#}");
            return Ok(());
        }
    };

    let url = database.connection_string().to_string();
    let store = DownloadStore::connect(&url)
        .await
        .context("failed to initialise download store")?;

    let result = test(store.clone(), url).await;

    store.pool().close().await;
    drop(database);

    result
}

fn sorted_by_user(mut users: Vec<downpour_core::UserDownloads>) -> Vec<downpour_core::UserDownloads> {
    users.sort_by(|a, b| a.username.cmp(&b.username));
    users
}

#[tokio::test]
async fn download_sets_round_trip_through_jsonb() -> Result<()> {
    with_download_store(|store, _url| async move {
        let records = vec![
            fixtures::active_record("t1", 40),
            fixtures::completed_record("t2", "https://download.real-debrid.com/d/ABC"),
        ];
        store.upsert_user("alice", &records).await?;
        store.upsert_user("idle", &[]).await?;

        let users = store.users_with_downloads().await?;
        assert_eq!(users.len(), 1, "empty sets are not eligible");
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].downloads, records);

        let mut advanced = records.clone();
        advanced[0].progress = 80;
        advanced[0].status = "downloading".to_string();
        store.update_user_downloads("alice", &advanced).await?;

        let users = store.users_with_downloads().await?;
        assert_eq!(users[0].downloads, advanced);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn legacy_documents_without_resolved_flag_still_decode() -> Result<()> {
    with_download_store(|store, _url| async move {
        sqlx::query("INSERT INTO users (username, downloads) VALUES ($1, $2::jsonb)")
            .bind("legacy")
            .bind(r#"[{"id":"t9","progress":55,"status":"downloading"}]"#)
            .execute(store.pool())
            .await?;

        let users = store.users_with_downloads().await?;
        assert_eq!(users.len(), 1);
        let record = &users[0].downloads[0];
        assert_eq!(record.id, "t9");
        assert_eq!(record.progress, 55);
        assert!(!record.resolved);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn delete_download_removes_one_record_by_id() -> Result<()> {
    with_download_store(|store, _url| async move {
        let records = vec![
            fixtures::active_record("keep", 10),
            fixtures::active_record("drop", 20),
        ];
        store.upsert_user("bob", &records).await?;

        store.delete_download("bob", "drop").await?;

        let users = store.users_with_downloads().await?;
        let remaining: Vec<&DownloadRecord> = users[0].downloads.iter().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "keep");
        Ok(())
    })
    .await
}

#[tokio::test]
async fn writes_for_one_user_leave_other_users_untouched() -> Result<()> {
    with_download_store(|store, _url| async move {
        let alice = vec![fixtures::active_record("a1", 10)];
        let bob = vec![fixtures::active_record("b1", 20)];
        store.upsert_user("alice", &alice).await?;
        store.upsert_user("bob", &bob).await?;

        let replaced = vec![fixtures::completed_record(
            "a1",
            "https://download.real-debrid.com/d/A1",
        )];
        store.update_user_downloads("alice", &replaced).await?;

        let users = sorted_by_user(store.users_with_downloads().await?);
        assert_eq!(users[0].downloads, replaced);
        assert_eq!(users[1].downloads, bob);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn queued_notifications_reach_the_listener() -> Result<()> {
    with_download_store(|store, url| async move {
        let mut listener = QueueListener::connect(&url).await?;

        store.notify_downloads_queued("alice").await?;

        let notification = listener.recv().await?;
        assert_eq!(notification.channel, DOWNLOADS_CHANNEL);
        assert_eq!(notification.payload, "alice");

        listener.unlisten().await?;
        Ok(())
    })
    .await
}
