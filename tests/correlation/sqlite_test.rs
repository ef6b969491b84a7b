//! Tests for the SQLite correlation backend.

use std::time::Duration;

use vxwhatsapp::correlation::{CorrelationStore, KeyValueBackend, SqliteBackend, DEFAULT_TTL};

async fn open(dir: &tempfile::TempDir) -> SqliteBackend {
    match SqliteBackend::open(&dir.path().join("state").join("correlations.db")).await {
        Ok(backend) => backend,
        Err(err) => panic!("sqlite backend should open: {err:#}"),
    }
}

#[tokio::test]
async fn record_resolve_and_retire() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = CorrelationStore::new(Box::new(open(&dir).await), "whatsapp");

    store.record_default("P1", "M1").await.expect("record");
    assert_eq!(store.resolve("P1").await.expect("resolve"), "M1");
    assert_eq!(store.resolve_and_retire("P1").await.expect("retire"), "M1");
    let again = store.resolve("P1").await;
    assert!(again.is_err_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn upsert_replaces_the_value() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let backend = open(&dir).await;

    backend
        .set_with_expiry("k", "first", DEFAULT_TTL)
        .await
        .expect("insert");
    backend
        .set_with_expiry("k", "second", DEFAULT_TTL)
        .await
        .expect("upsert");
    assert_eq!(
        backend.get("k").await.expect("get"),
        Some("second".to_owned())
    );
}

#[tokio::test]
async fn entries_survive_a_reopen() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    {
        let store = CorrelationStore::new(Box::new(open(&dir).await), "whatsapp");
        store.record_default("P1", "M1").await.expect("record");
    }

    let store = CorrelationStore::new(Box::new(open(&dir).await), "whatsapp");
    assert_eq!(store.resolve("P1").await.expect("after reopen"), "M1");
}

#[tokio::test]
async fn expired_rows_are_invisible_and_purged() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let backend = open(&dir).await;

    backend
        .set_with_expiry("old", "M1", Duration::ZERO)
        .await
        .expect("insert expired");
    backend
        .set_with_expiry("new", "M2", DEFAULT_TTL)
        .await
        .expect("insert live");

    assert_eq!(backend.get("old").await.expect("get"), None);
    assert_eq!(backend.purge_expired().await.expect("purge"), 1);
    assert_eq!(backend.purge_expired().await.expect("purge again"), 0);
    assert_eq!(backend.get("new").await.expect("get"), Some("M2".to_owned()));
}

#[tokio::test]
async fn deleting_an_absent_key_is_fine() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let backend = open(&dir).await;
    backend.delete("missing").await.expect("delete");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retires_succeed_once() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = std::sync::Arc::new(CorrelationStore::new(Box::new(open(&dir).await), "whatsapp"));

    for round in 0..20 {
        let protocol_id = format!("P{round}");
        store.record_default(&protocol_id, "M1").await.expect("record");

        let (a, b) = (store.clone(), store.clone());
        let (id_a, id_b) = (protocol_id.clone(), protocol_id.clone());
        let first = tokio::spawn(async move { a.resolve_and_retire(&id_a).await });
        let second = tokio::spawn(async move { b.resolve_and_retire(&id_b).await });
        let results = [
            first.await.expect("task"),
            second.await.expect("task"),
        ];

        let retired = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(retired, 1, "round {round}: {results:?}");
        let lookup = store.resolve(&protocol_id).await;
        assert!(lookup.is_err_and(|e| e.is_not_found()));
    }
}

#[tokio::test]
async fn take_skips_expired_rows() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let backend = open(&dir).await;

    backend
        .set_with_expiry("gone", "M1", Duration::ZERO)
        .await
        .expect("insert");
    backend
        .set_with_expiry("here", "M2", DEFAULT_TTL)
        .await
        .expect("insert");
    assert_eq!(backend.take("gone").await.expect("take"), None);
    assert_eq!(backend.take("here").await.expect("take"), Some("M2".to_owned()));
    assert_eq!(backend.get("here").await.expect("get"), None);
}
