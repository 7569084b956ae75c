//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactStore`, which satisfies the `ArtifactSink`
//! contract without touching the filesystem and can be told to start failing
//! writes to exercise run-fault paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Clone)]
struct StoredArtifact {
    category: ArtifactCategory,
    payload: serde_json::Value,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    runs: HashMap<RunId, BTreeMap<String, StoredArtifact>>,
    writes: usize,
    fail_after: Option<usize>,
}

/// In-memory artifact store backed by `HashMap<RunId, BTreeMap<path, artifact>>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    state: Mutex<StoreState>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that accepts `n` writes and rejects every later one with
    /// `StorageError::Unavailable`.
    pub fn failing_after(n: usize) -> Self {
        let store = Self::default();
        store.lock().fail_after = Some(n);
        store
    }

    /// Total successful writes across all runs.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Paths stored for a run, in path order.
    pub fn paths(&self, run_id: &RunId) -> Vec<String> {
        self.lock()
            .runs
            .get(run_id)
            .map(|artifacts| artifacts.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactStore {
    async fn write_artifact(
        &self,
        run_id: &RunId,
        category: ArtifactCategory,
        name: &str,
        payload: &serde_json::Value,
    ) -> StorageResult<String> {
        let path = artifact_path(category, name)?;
        let size_bytes = serde_json::to_vec(payload)?.len() as u64;

        let mut state = self.lock();
        if let Some(limit) = state.fail_after {
            if state.writes >= limit {
                return Err(StorageError::Unavailable(format!(
                    "injected failure after {limit} writes"
                )));
            }
        }

        let artifacts = state.runs.entry(run_id.clone()).or_default();
        if artifacts.contains_key(&path) {
            return Err(StorageError::AlreadyExists {
                run_id: run_id.to_string(),
                path,
            });
        }
        artifacts.insert(
            path.clone(),
            StoredArtifact {
                category,
                payload: payload.clone(),
                size_bytes,
                created_at: Utc::now(),
            },
        );
        state.writes += 1;
        Ok(path)
    }

    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactInfo>> {
        let state = self.lock();
        let artifacts = state
            .runs
            .get(run_id)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        Ok(artifacts
            .iter()
            .map(|(path, stored)| ArtifactInfo {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: path.clone(),
                category: stored.category,
                size_bytes: stored.size_bytes,
                created_at: stored.created_at,
            })
            .collect())
    }

    async fn read_artifact(
        &self,
        run_id: &RunId,
        path: &str,
    ) -> StorageResult<serde_json::Value> {
        let state = self.lock();
        state
            .runs
            .get(run_id)
            .and_then(|artifacts| artifacts.get(path))
            .map(|stored| stored.payload.clone())
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.to_string(),
                path: path.to_string(),
            })
    }
}
