//! Error taxonomy for planning and execution.
//!
//! - [`ValidationError`]: model rejected by the planner, fatal to planning
//! - [`crate::adapter::AdapterError`]: target-system failure, recorded as a job failure
//! - [`PluginFault`]: unexpected plugin failure or panic, recorded as a job failure
//! - [`RunFault`]: infrastructure failure, fatal to the run

use sapfactory_state::StorageError;

use crate::adapter::AdapterError;
use crate::domain::job::JobKind;

/// Model rejected before any adapter is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind} '{item}' targets undeclared system '{system}'")]
    UndeclaredTarget {
        kind: JobKind,
        item: String,
        system: String,
    },

    #[error("migration object '{object}' has no field mapping")]
    EmptyMapping { object: String },

    #[error("test suite '{suite}' has no cases")]
    EmptySuite { suite: String },

    #[error("system '{system}' is declared more than once")]
    DuplicateSystem { system: String },

    #[error("migration object '{object}' has batch_size 0")]
    ZeroBatchSize { object: String },
}

/// Unexpected internal plugin error, caught at the executor boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginFault {
    #[error("job {job_id} carries a payload for a different plugin (expected {expected})")]
    PayloadMismatch { job_id: String, expected: JobKind },

    #[error("plugin panicked: {message}")]
    Panicked { message: String },

    #[error("plugin error: {0}")]
    Internal(String),
}

/// Infrastructure failure that aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum RunFault {
    #[error("failed to write {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("adapter '{adapter}' unavailable for system '{system}': {source}")]
    AdapterLookup {
        adapter: String,
        system: String,
        #[source]
        source: AdapterError,
    },

    #[error("failed to serialise {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error for library entry points.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("invalid model: {0}")]
    Validation(#[from] ValidationError),

    #[error("unsupported model file {path}: {message}")]
    ModelFormat { path: String, message: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {0} terminated without reporting an outcome")]
    RunAborted(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for factory operations.
pub type Result<T> = std::result::Result<T, FactoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_the_system() {
        let err = ValidationError::UndeclaredTarget {
            kind: JobKind::Migration,
            item: "BUSINESS_PARTNER".to_string(),
            system: "QAS".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("migration"));
        assert!(msg.contains("QAS"));
    }

    #[test]
    fn run_fault_wraps_storage_error() {
        let fault = RunFault::Storage {
            path: "summary.json".to_string(),
            source: StorageError::Unavailable("disk full".to_string()),
        };
        let msg = fault.to_string();
        assert!(msg.contains("summary.json"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn factory_error_from_validation() {
        let err: FactoryError = ValidationError::EmptySuite {
            suite: "SMOKE".to_string(),
        }
        .into();
        assert!(err.to_string().contains("invalid model"));
    }
}
