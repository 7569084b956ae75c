//! Trait contract tests for ArtifactSink.
//!
//! Each contract runs against both the in-memory fake and the filesystem
//! store. Any conforming implementation must pass these.

use serde_json::json;

use sapfactory_state::fakes::MemoryArtifactStore;
use sapfactory_state::storage_traits::*;
use sapfactory_state::{FsArtifactStore, StorageError};

async fn contract_roundtrip(sink: &dyn ArtifactSink) {
    let run = RunId::new();
    let payload = json!({"job_id": "migr_002_BP", "matched": 10, "missing": 0});
    let path = sink
        .write_artifact(&run, ArtifactCategory::Migration, "migr_002_BP", &payload)
        .await
        .unwrap();

    assert_eq!(path, "migration/migr_002_BP.json");
    assert_eq!(sink.read_artifact(&run, &path).await.unwrap(), payload);
}

async fn contract_append_only(sink: &dyn ArtifactSink) {
    let run = RunId::new();
    sink.write_summary(&run, &json!({"status": "completed"}))
        .await
        .unwrap();
    let err = sink
        .write_summary(&run, &json!({"status": "failed"}))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::AlreadyExists { .. }));
    assert_eq!(
        sink.read_artifact(&run, SUMMARY_FILE).await.unwrap(),
        json!({"status": "completed"})
    );
}

async fn contract_listing_sorted_by_path(sink: &dyn ArtifactSink) {
    let run = RunId::new();
    let v = json!({});
    sink.write_artifact(&run, ArtifactCategory::Testing, "test_003_SMOKE", &v)
        .await
        .unwrap();
    sink.write_artifact(&run, ArtifactCategory::Root, "plan", &v)
        .await
        .unwrap();
    sink.write_artifact(&run, ArtifactCategory::Customizing, "cust_001_FI", &v)
        .await
        .unwrap();

    let paths: Vec<String> = sink
        .list_artifacts(&run)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.path)
        .collect();
    assert_eq!(
        paths,
        vec![
            "customizing/cust_001_FI.json",
            "plan.json",
            "testing/test_003_SMOKE.json",
        ]
    );
}

async fn contract_runs_are_partitioned(sink: &dyn ArtifactSink) {
    let a = RunId::new();
    let b = RunId::new();
    sink.write_artifact(&a, ArtifactCategory::Root, "plan", &json!({"run": "a"}))
        .await
        .unwrap();
    sink.write_artifact(&b, ArtifactCategory::Root, "plan", &json!({"run": "b"}))
        .await
        .unwrap();

    assert_eq!(
        sink.read_artifact(&a, "plan.json").await.unwrap(),
        json!({"run": "a"})
    );
    assert_eq!(
        sink.read_artifact(&b, "plan.json").await.unwrap(),
        json!({"run": "b"})
    );
}

async fn contract_missing_artifact(sink: &dyn ArtifactSink) {
    let run = RunId::new();
    sink.write_artifact(&run, ArtifactCategory::Root, "plan", &json!({}))
        .await
        .unwrap();
    let err = sink
        .read_artifact(&run, "testing/nope.json")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

async fn contract_names_are_sanitised(sink: &dyn ArtifactSink) {
    let run = RunId::new();
    let path = sink
        .write_artifact(
            &run,
            ArtifactCategory::Customizing,
            "cust_001_FI BASE/v2",
            &json!({}),
        )
        .await
        .unwrap();
    assert_eq!(path, "customizing/cust_001_FI_BASE_v2.json");
}

async fn run_all(sink: &dyn ArtifactSink) {
    contract_roundtrip(sink).await;
    contract_append_only(sink).await;
    contract_listing_sorted_by_path(sink).await;
    contract_runs_are_partitioned(sink).await;
    contract_missing_artifact(sink).await;
    contract_names_are_sanitised(sink).await;
}

#[tokio::test]
async fn memory_store_satisfies_contracts() {
    let store = MemoryArtifactStore::new();
    run_all(&store).await;
}

#[tokio::test]
async fn fs_store_satisfies_contracts() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path()).unwrap();
    run_all(&store).await;
}

#[tokio::test]
async fn memory_store_injected_failure() {
    let store = MemoryArtifactStore::failing_after(1);
    let run = RunId::new();
    store
        .write_artifact(&run, ArtifactCategory::Root, "plan", &json!({}))
        .await
        .unwrap();
    let err = store
        .write_summary(&run, &json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Unavailable(_)));
    assert_eq!(store.write_count(), 1);
    assert_eq!(store.paths(&run), vec!["plan.json".to_string()]);
}
