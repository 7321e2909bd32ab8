//! Postgres store tests using testcontainers
//!
//! These tests require Docker. Run with:
//!
//! ```bash
//! cargo test -p callsync --test postgres_tests -- --ignored --nocapture
//! ```

mod common;

use callsync::db::{AuditStore, CallTable, PgCallStore};
use callsync::models::{AuditRecord, NormalizedRow, UploadStatus};
use chrono::{SubsecRound, Utc};
use common::{init_test_tracing, ts, TestPostgres};
use serde_json::json;
use uuid::Uuid;

fn row(id: &str, status: UploadStatus) -> NormalizedRow {
    let mut row = NormalizedRow::new(id, ts(9));
    row.status = Some("ended".to_string());
    row.created_at = Some(ts(8));
    row.raw = json!({"id": id, "status": "ended"});
    row.customer = json!({"number": "+15550100"});
    row.upload_status = status;
    row
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_is_idempotent() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = PgCallStore::from_pool(pg.pool().clone()).with_batch_size(2);

    let rows = vec![
        row("a", UploadStatus::Uploaded),
        row("b", UploadStatus::Failed),
        row("c", UploadStatus::SkippedNoUrl),
    ];

    let audit_ts = Utc::now().trunc_subsecs(6);
    store.upsert(&rows, audit_ts).await.unwrap();
    store.upsert(&rows, audit_ts).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ai_calls")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(count, 3);

    let customer_null: bool =
        sqlx::query_scalar("SELECT customer IS NULL FROM ai_calls WHERE id = 'a'")
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert!(!customer_null);

    assert_eq!(store.oldest_incomplete_upload().await.unwrap(), Some(ts(9)));
    let mut retried = row("b", UploadStatus::Uploaded);
    retried.signed_url = Some("https://bucket.test/b.mp3".to_string());
    store.upsert(&[retried], audit_ts).await.unwrap();
    assert_eq!(store.oldest_incomplete_upload().await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_overwrites_and_existing_reports_state() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = PgCallStore::from_pool(pg.pool().clone());

    let audit_ts = Utc::now().trunc_subsecs(6);
    store
        .upsert(&[row("a", UploadStatus::Failed)], audit_ts)
        .await
        .unwrap();

    let mut newer = row("a", UploadStatus::Uploaded);
    newer.updated_at = ts(10);
    newer.signed_url = Some("https://bucket.test/a.mp3".to_string());
    store.upsert(&[newer], audit_ts).await.unwrap();

    let found = store
        .existing(&["a".to_string(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found["a"].updated_at, ts(10));
    assert!(found["a"].upload_complete);

    let expiry = ts(12);
    store
        .update_signed_url("a", "https://bucket.test/a.mp3?fresh", expiry)
        .await
        .unwrap();
    let url: String = sqlx::query_scalar("SELECT signed_url FROM ai_calls WHERE id = 'a'")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(url, "https://bucket.test/a.mp3?fresh");

    assert!(store
        .update_signed_url("missing", "x", expiry)
        .await
        .is_err());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_audit_round_trip_returns_newest() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = PgCallStore::from_pool(pg.pool().clone());

    assert!(store.last_audit().await.unwrap().is_none());

    let audit = |completed_at| AuditRecord {
        run_id: Uuid::new_v4(),
        window_start: Some(ts(1)),
        window_end: None,
        extracted: 3,
        transformed: 3,
        existing: 1,
        new_or_updated: 2,
        transform_errors: 0,
        uploaded: 1,
        failed: 1,
        skipped_no_url: 0,
        validation_failures: 0,
        loaded: 2,
        completed_at,
    };

    let older = audit(ts(5));
    let newer = audit(ts(6));
    store.record_audit(&newer).await.unwrap();
    store.record_audit(&older).await.unwrap();

    let last = store.last_audit().await.unwrap().unwrap();
    assert_eq!(last, newer);
}
