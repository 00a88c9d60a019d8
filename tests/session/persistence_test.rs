//! Integration tests for the persistence backends.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use nlquery::session::persistence::open_store;
use nlquery::session::{ConversationContext, FileStore, NullStore, SessionStore, StoreError};

fn context(id: &str, user: &str) -> ConversationContext {
    let mut ctx = ConversationContext::new(id, user);
    ctx.add_history_entry("who deleted the CRD?", json!({"verb": "delete"}));
    ctx.resolve_reference("it", "crd/widgets", "resource");
    ctx
}

async fn file_store(dir: &tempfile::TempDir) -> FileStore {
    match FileStore::open(dir.path()).await {
        Ok(store) => store,
        Err(e) => panic!("store should open: {e}"),
    }
}

fn tempdir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("tempdir should be created: {e}"),
    }
}

#[tokio::test]
async fn save_then_load_round_trips_by_value() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    let ctx = context("sess-1", "user-1");

    assert!(store.save_session("sess-1", &ctx).await.is_ok());
    match store.load_session("sess-1").await {
        Ok(loaded) => assert_eq!(loaded, ctx),
        Err(e) => panic!("load should succeed: {e}"),
    }
}

#[tokio::test]
async fn load_of_missing_session_is_not_found() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    match store.load_session("ghost").await {
        Err(StoreError::NotFound { id }) => assert_eq!(id, "ghost"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_is_idempotent_and_makes_load_miss() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    let ctx = context("sess-1", "user-1");
    assert!(store.save_session("sess-1", &ctx).await.is_ok());

    assert!(store.delete_session("sess-1").await.is_ok());
    assert!(store.delete_session("sess-1").await.is_ok());
    assert!(matches!(
        store.load_session("sess-1").await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn batch_save_persists_every_valid_session() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    let sessions = HashMap::from([
        ("a".to_owned(), context("a", "u1")),
        ("b".to_owned(), context("b", "u2")),
    ]);

    assert!(store.batch_save_sessions(&sessions).await.is_ok());
    for (id, expected) in &sessions {
        match store.load_session(id).await {
            Ok(loaded) => assert_eq!(&loaded, expected),
            Err(e) => panic!("load of {id} should succeed: {e}"),
        }
    }
}

#[tokio::test]
async fn batch_save_skips_invalid_ids_without_failing() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    let sessions = HashMap::from([
        ("good".to_owned(), context("good", "u1")),
        ("../evil".to_owned(), context("../evil", "u2")),
    ]);

    assert!(store.batch_save_sessions(&sessions).await.is_ok());
    assert!(store.load_session("good").await.is_ok());
    assert!(store.stats().failures >= 1);
}

#[tokio::test]
async fn load_all_returns_persisted_sessions() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    assert!(store.save_session("a", &context("a", "u1")).await.is_ok());
    assert!(store.save_session("b", &context("b", "u2")).await.is_ok());

    match store.load_all_sessions().await {
        Ok(all) => {
            assert_eq!(all.len(), 2);
            assert!(all.contains_key("a"));
            assert!(all.contains_key("b"));
        }
        Err(e) => panic!("load_all should succeed: {e}"),
    }
}

#[tokio::test]
async fn no_temp_file_remains_after_save() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    assert!(store
        .save_session("sess-1", &context("sess-1", "u"))
        .await
        .is_ok());

    let sessions_dir = dir.path().join("sessions");
    let leftovers: Vec<_> = match std::fs::read_dir(&sessions_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect(),
        Err(e) => panic!("sessions dir should be readable: {e}"),
    };
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

#[tokio::test]
async fn concurrent_saves_of_one_session_stay_consistent() {
    let dir = tempdir();
    let store = Arc::new(file_store(&dir).await);

    let mut tasks = Vec::new();
    for i in 0..50 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let ctx = context("shared", &format!("user-{i}"));
            store.save_session("shared", &ctx).await
        }));
    }
    for task in tasks {
        match task.await {
            Ok(result) => assert!(result.is_ok(), "save failed: {result:?}"),
            Err(e) => panic!("save task panicked: {e}"),
        }
    }

    let sessions_dir = dir.path().join("sessions");
    let has_tmp = match std::fs::read_dir(&sessions_dir) {
        Ok(mut entries) => entries.any(|e| {
            e.map(|e| e.path().to_string_lossy().ends_with(".tmp"))
                .unwrap_or(false)
        }),
        Err(e) => panic!("sessions dir should be readable: {e}"),
    };
    assert!(!has_tmp);

    match store.load_session("shared").await {
        Ok(loaded) => {
            assert_eq!(loaded.session_id, "shared");
            assert!(loaded.user_id.starts_with("user-"));
        }
        Err(e) => panic!("final load should decode a consistent context: {e}"),
    }
}

#[tokio::test]
async fn session_id_rules_are_enforced() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    let ctx = context("x", "u");

    for bad in ["", "a/../b", "a/b", "a\\b", ".."] {
        assert!(
            matches!(
                store.save_session(bad, &ctx).await,
                Err(StoreError::InvalidSessionId { .. })
            ),
            "{bad:?} should be rejected"
        );
    }
    let long = "x".repeat(300);
    assert!(matches!(
        store.save_session(&long, &ctx).await,
        Err(StoreError::InvalidSessionId { .. })
    ));
}

#[tokio::test]
async fn metadata_reports_counts_and_format() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    assert!(store.save_session("a", &context("a", "u")).await.is_ok());

    match store.metadata().await {
        Ok(meta) => {
            assert_eq!(meta.total_sessions, 1);
            assert!(meta.total_bytes > 0);
            assert_eq!(meta.format, "json");
            assert!(meta.path.is_some());
        }
        Err(e) => panic!("metadata should succeed: {e}"),
    }
}

#[tokio::test]
async fn stats_track_operations() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    assert!(store.save_session("a", &context("a", "u")).await.is_ok());
    assert!(store.load_session("a").await.is_ok());
    assert!(store.delete_session("a").await.is_ok());

    let stats = store.stats();
    assert_eq!(stats.saves, 1);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.deletes, 1);
    assert!(stats.avg_op_duration_ms >= 0.0);
}

#[tokio::test]
async fn closed_store_refuses_operations() {
    let dir = tempdir();
    let store = file_store(&dir).await;
    assert!(store.close().await.is_ok());
    assert!(matches!(
        store.save_session("a", &context("a", "u")).await,
        Err(StoreError::Closed)
    ));
}

#[tokio::test]
async fn null_store_accepts_saves_and_never_finds() {
    let store = NullStore::new();
    let ctx = context("a", "u");

    assert!(store.save_session("a", &ctx).await.is_ok());
    assert!(matches!(
        store.load_session("a").await,
        Err(StoreError::NotFound { .. })
    ));
    match store.load_all_sessions().await {
        Ok(all) => assert!(all.is_empty()),
        Err(e) => panic!("load_all should succeed: {e}"),
    }
    match store.metadata().await {
        Ok(meta) => assert_eq!(meta.format, "memory"),
        Err(e) => panic!("metadata should succeed: {e}"),
    }
}

#[tokio::test]
async fn backend_factory_selects_by_name() {
    let dir = tempdir();
    assert!(open_store("file", dir.path()).await.is_ok());
    assert!(open_store("memory", dir.path()).await.is_ok());
    assert!(matches!(
        open_store("redis", dir.path()).await,
        Err(StoreError::UnknownBackend(_))
    ));
}
