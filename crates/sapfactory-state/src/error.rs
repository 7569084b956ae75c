//! Error types for sapfactory-state

use thiserror::Error;

/// Errors that can occur while persisting or reading run artifacts
#[derive(Error, Debug)]
pub enum StorageError {
    /// No artifact stored under the given path for the run
    #[error("artifact not found: {run_id}/{path}")]
    NotFound { run_id: String, path: String },

    /// Nothing was ever written for the run
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// The sink is append-only per run; an artifact may be written once
    #[error("artifact already exists: {run_id}/{path}")]
    AlreadyExists { run_id: String, path: String },

    /// Artifact name is empty or sanitises to nothing
    #[error("invalid artifact name: {name:?}")]
    InvalidName { name: String },

    /// The backing store refused the write
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_displays_path() {
        let err = StorageError::AlreadyExists {
            run_id: "run-1".to_string(),
            path: "customizing/cust_001_FI.json".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("run-1"));
        assert!(msg.contains("cust_001_FI.json"));
    }

    #[test]
    fn test_unavailable_display() {
        let err = StorageError::Unavailable("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }
}
