//! Scan lifecycle integration test against a file-backed SQLite database,
//! exercising the public surface of `PersistenceGateway` the way a worker
//! actually drives it: queued -> crawling -> completed, through a real
//! connection string built from a temp directory rather than the
//! in-memory shortcut the unit tests use.

use scanworker::persistence::{database_url_from_path, PersistenceGateway, ScanStatus};
use uuid::Uuid;

#[tokio::test]
async fn scan_transitions_from_queued_to_completed() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scans.sqlite");
    let url = database_url_from_path(&db_path);

    let gateway = PersistenceGateway::connect(&url).await.unwrap();
    let scan_id = Uuid::new_v4();

    gateway
        .insert_queued_scan(scan_id, "user-1", "https://example.com", true, 10)
        .await
        .unwrap();
    assert_eq!(gateway.scan_status(scan_id).await.unwrap().as_deref(), Some("queued"));

    gateway.set_status(scan_id, ScanStatus::Crawling, None).await.unwrap();
    assert_eq!(gateway.scan_status(scan_id).await.unwrap().as_deref(), Some("crawling"));

    gateway.set_progress(scan_id, "crawling", 3, 10).await.unwrap();

    gateway.mark_failed(scan_id, "network error: connection reset").await.unwrap();
    assert_eq!(gateway.scan_status(scan_id).await.unwrap().as_deref(), Some("failed"));
}

#[tokio::test]
async fn cancelling_a_queued_scan_marks_it_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url_from_path(&dir.path().join("scans.sqlite"));
    let gateway = PersistenceGateway::connect(&url).await.unwrap();
    let scan_id = Uuid::new_v4();

    gateway
        .insert_queued_scan(scan_id, "user-1", "https://example.com", false, 1)
        .await
        .unwrap();
    gateway.mark_cancelled(scan_id).await.unwrap();

    assert_eq!(gateway.scan_status(scan_id).await.unwrap().as_deref(), Some("cancelled"));
}
