//! Storage trait definitions for SAP Factory run evidence
//!
//! `ArtifactSink` is the single persistence seam the execution engine writes
//! through. Layout per run id:
//!
//! ```text
//! <run_id>/
//!     plan.json
//!     summary.json
//!     customizing/<job_id>.json
//!     migration/<job_id>.json
//!     testing/<job_id>.json
//! ```
//!
//! All operations are async and backend-agnostic. An in-memory fake is
//! provided in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// File name of the run-level summary artifact.
pub const SUMMARY_FILE: &str = "summary.json";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Unique identifier for an implementation run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Artifact descriptors
// ---------------------------------------------------------------------------

/// Sub-directory an artifact is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    /// Run root (`plan.json`, `summary.json`)
    Root,
    Customizing,
    Migration,
    Testing,
}

impl ArtifactCategory {
    /// Directory name relative to the run root (empty for `Root`).
    pub fn dir(&self) -> &'static str {
        match self {
            ArtifactCategory::Root => "",
            ArtifactCategory::Customizing => "customizing",
            ArtifactCategory::Migration => "migration",
            ArtifactCategory::Testing => "testing",
        }
    }

    /// Inverse of [`ArtifactCategory::dir`].
    pub fn from_dir(dir: &str) -> Option<Self> {
        match dir {
            "" => Some(ArtifactCategory::Root),
            "customizing" => Some(ArtifactCategory::Customizing),
            "migration" => Some(ArtifactCategory::Migration),
            "testing" => Some(ArtifactCategory::Testing),
            _ => None,
        }
    }
}

/// Listing entry for a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// File name (`<name>.json`)
    pub name: String,
    /// Path relative to the run root, `/`-separated
    pub path: String,
    pub category: ArtifactCategory,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Job ids embed declared package/object ids, which may contain spaces or
/// slashes; the sanitised form is always a single path segment.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Relative path for an artifact: `<dir>/<sanitised name>.json`.
pub fn artifact_path(category: ArtifactCategory, name: &str) -> StorageResult<String> {
    let file_stem = sanitize_name(name.trim_end_matches(".json"));
    if file_stem.is_empty() {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }
    let file = format!("{file_stem}.json");
    Ok(match category {
        ArtifactCategory::Root => file,
        other => format!("{}/{}", other.dir(), file),
    })
}

// ---------------------------------------------------------------------------
// ArtifactSink
// ---------------------------------------------------------------------------

/// Append-only evidence sink, partitioned by run id.
///
/// Guarantees:
/// - A given `(run_id, path)` is written at most once; a second write fails
///   with `StorageError::AlreadyExists`.
/// - `read_artifact` returns exactly the JSON previously written.
/// - `list_artifacts` is sorted by path.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist one JSON artifact, returning its run-relative path.
    async fn write_artifact(
        &self,
        run_id: &RunId,
        category: ArtifactCategory,
        name: &str,
        payload: &serde_json::Value,
    ) -> StorageResult<String>;

    /// Persist `summary.json` at the run root.
    async fn write_summary(
        &self,
        run_id: &RunId,
        summary: &serde_json::Value,
    ) -> StorageResult<String> {
        self.write_artifact(run_id, ArtifactCategory::Root, SUMMARY_FILE, summary)
            .await
    }

    /// List every artifact stored for a run.
    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactInfo>>;

    /// Read one artifact by run-relative path (e.g. `migration/migr_002_BP.json`).
    async fn read_artifact(&self, run_id: &RunId, path: &str)
        -> StorageResult<serde_json::Value>;
}
