//! Engine configuration.
//!
//! Every field has a default, so an empty document (or no file at all) is a
//! valid configuration. The CLI layers flags and `SAPFACTORY_*` environment
//! variables on top of a loaded file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{FactoryError, Result};

/// What happens to later jobs after a job fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Run every job regardless of earlier failures.
    #[default]
    Continue,
    /// Skip every remaining job after the first failure.
    Stop,
    /// Skip remaining jobs bound to a system where a job already failed.
    SkipSameSystem,
}

/// Re-invocation of jobs that failed on a transient adapter error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per job, including the first. Values below 1 mean 1.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Manual-effort and duration estimates attached to every plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatePolicy {
    pub hours_per_customizing_step: f64,
    pub hours_per_migration_object: f64,
    pub hours_per_test_case: f64,
    /// Project-management overhead applied to the run total.
    pub overhead_factor: f64,

    pub base_minutes_customizing: f64,
    pub base_minutes_migration: f64,
    pub base_minutes_testing: f64,
    pub steps_per_minute: f64,
    pub records_per_minute: f64,
    pub cases_per_minute: f64,
    /// Buffer applied to the summed duration.
    pub duration_buffer: f64,
}

impl Default for EstimatePolicy {
    fn default() -> Self {
        Self {
            hours_per_customizing_step: 2.0,
            hours_per_migration_object: 4.0,
            hours_per_test_case: 1.0,
            overhead_factor: 1.2,
            base_minutes_customizing: 5.0,
            base_minutes_migration: 15.0,
            base_minutes_testing: 10.0,
            steps_per_minute: 100.0,
            records_per_minute: 500.0,
            cases_per_minute: 50.0,
            duration_buffer: 1.1,
        }
    }
}

/// Log output settings used by binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub json: bool,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration for an execution engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Root directory of the filesystem artifact store.
    pub artifacts_dir: PathBuf,
    /// Adapter registry key used for every target system.
    pub adapter: String,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
    pub estimates: EstimatePolicy,
    pub log: LogConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            adapter: "fake".to_string(),
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
            estimates: EstimatePolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl FactoryConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&text)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&text)?),
            _ => Err(FactoryError::ModelFormat {
                path: path.display().to_string(),
                message: "expected a .json, .yaml or .yml config file".to_string(),
            }),
        }
    }
}
