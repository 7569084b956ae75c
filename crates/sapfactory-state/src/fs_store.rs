use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Filesystem-backed artifact store.
///
/// Layout: `<root>/<run_id>/[<category>/]<name>.json`, pretty-printed JSON.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a new `FsArtifactStore` rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &RunId) -> StorageResult<PathBuf> {
        let segment = sanitize_name(run_id.as_str());
        if segment.is_empty() {
            return Err(StorageError::InvalidName {
                name: run_id.to_string(),
            });
        }
        Ok(self.root.join(segment))
    }

    fn resolve(&self, run_id: &RunId, path: &str) -> StorageResult<PathBuf> {
        let mut full = self.run_dir(run_id)?;
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidName {
                    name: path.to_string(),
                });
            }
            full.push(segment);
        }
        Ok(full)
    }

    fn collect(
        dir: &Path,
        category: ArtifactCategory,
        out: &mut Vec<ArtifactInfo>,
    ) -> StorageResult<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") {
                continue;
            }
            let path = match category {
                ArtifactCategory::Root => name.clone(),
                other => format!("{}/{}", other.dir(), name),
            };
            let created_at: DateTime<Utc> = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(ArtifactInfo {
                name,
                path,
                category,
                size_bytes: meta.len(),
                created_at,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactStore {
    async fn write_artifact(
        &self,
        run_id: &RunId,
        category: ArtifactCategory,
        name: &str,
        payload: &serde_json::Value,
    ) -> StorageResult<String> {
        let rel = artifact_path(category, name)?;
        let path = self.resolve(run_id, &rel)?;

        if path.exists() {
            return Err(StorageError::AlreadyExists {
                run_id: run_id.to_string(),
                path: rel,
            });
        }

        let dir = match path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => {
                return Err(StorageError::InvalidName {
                    name: name.to_string(),
                })
            }
        };
        fs::create_dir_all(&dir)?;

        let bytes = serde_json::to_vec_pretty(payload)?;

        // Atomic write: temp file in the target directory, then no-clobber rename.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StorageError::AlreadyExists {
                    run_id: run_id.to_string(),
                    path: rel.clone(),
                }
            } else {
                StorageError::Io(e.error)
            }
        })?;

        debug!(run_id = %run_id, path = %rel, bytes = bytes.len(), "artifact written");
        Ok(rel)
    }

    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactInfo>> {
        let run_dir = self.run_dir(run_id)?;
        if !run_dir.is_dir() {
            return Err(StorageError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        let mut out = Vec::new();
        for category in [
            ArtifactCategory::Root,
            ArtifactCategory::Customizing,
            ArtifactCategory::Migration,
            ArtifactCategory::Testing,
        ] {
            Self::collect(&run_dir.join(category.dir()), category, &mut out)?;
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn read_artifact(
        &self,
        run_id: &RunId,
        path: &str,
    ) -> StorageResult<serde_json::Value> {
        let full = self.resolve(run_id, path)?;
        let bytes = fs::read(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    run_id: run_id.to_string(),
                    path: path.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn artifact_roundtrip_on_disk() {
        let (dir, store) = make_store();
        let run = RunId::from("run-fs-1");
        let payload = json!({"job_id": "cust_001_FI", "status": "succeeded"});

        let rel = store
            .write_artifact(&run, ArtifactCategory::Customizing, "cust_001_FI", &payload)
            .await
            .unwrap();
        assert_eq!(rel, "customizing/cust_001_FI.json");
        assert!(dir
            .path()
            .join("run-fs-1")
            .join("customizing")
            .join("cust_001_FI.json")
            .is_file());

        let back = store.read_artifact(&run, &rel).await.unwrap();
        assert_eq!(back, payload);
    }

    #[tokio::test]
    async fn second_write_is_rejected() {
        let (_dir, store) = make_store();
        let run = RunId::from("run-fs-2");
        store
            .write_artifact(&run, ArtifactCategory::Root, "plan", &json!({"jobs": []}))
            .await
            .unwrap();
        let err = store
            .write_artifact(&run, ArtifactCategory::Root, "plan", &json!({"jobs": [1]}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        let kept = store.read_artifact(&run, "plan.json").await.unwrap();
        assert_eq!(kept, json!({"jobs": []}));
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, store) = make_store();
        let run = RunId::from("run-fs-3");
        let err = store.read_artifact(&run, "../escape.json").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn missing_run_is_reported() {
        let (_dir, store) = make_store();
        let err = store
            .list_artifacts(&RunId::from("never-written"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let (dir, store) = make_store();
        let run = RunId::from("run-fs-4");
        store
            .write_summary(&run, &json!({"status": "completed"}))
            .await
            .unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("run-fs-4"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["summary.json".to_string()]);
    }
}
