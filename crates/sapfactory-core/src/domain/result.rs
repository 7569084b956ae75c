//! Per-job outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapter::AdapterError;
use crate::domain::error::PluginFault;
use crate::domain::job::{Job, JobKind};

/// Per-job lifecycle: `pending -> running -> succeeded | failed | skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reason a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureCause {
    /// The target system rejected or could not serve a call.
    Adapter { code: String, transient: bool },
    /// Calls succeeded but an expectation did not hold.
    Assertion,
    /// Source and target disagree after a migration load.
    Reconciliation,
    /// Job parameters are incomplete or inconsistent.
    InvalidPayload,
    /// The plugin itself failed or panicked.
    PluginFault,
}

/// Error detail attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub cause: FailureCause,
    pub message: String,
    /// Index of the failing step (customizing) or case (testing), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
}

impl JobError {
    pub fn adapter(err: &AdapterError) -> Self {
        Self {
            cause: FailureCause::Adapter {
                code: err.code().to_string(),
                transient: err.is_transient(),
            },
            message: err.to_string(),
            step_index: None,
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::Assertion,
            message: message.into(),
            step_index: None,
        }
    }

    pub fn reconciliation(message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::Reconciliation,
            message: message.into(),
            step_index: None,
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self {
            cause: FailureCause::InvalidPayload,
            message: message.into(),
            step_index: None,
        }
    }

    pub fn plugin_fault(fault: &PluginFault) -> Self {
        Self {
            cause: FailureCause::PluginFault,
            message: fault.to_string(),
            step_index: None,
        }
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }

    /// True when a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.cause,
            FailureCause::Adapter {
                transient: true,
                ..
            }
        )
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub kind: JobKind,
    pub label: String,
    pub target_system: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Number of times the plugin was invoked (0 for skipped jobs).
    pub attempts: u32,
    pub dry_run: bool,
    pub records_processed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    /// Kind-specific evidence: step outcomes, reconciliation or case outcomes.
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl JobResult {
    fn finish(job: &Job, status: JobStatus, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        Self {
            job_id: job.id.clone(),
            kind: job.kind,
            label: job.label.clone(),
            target_system: job.target_system.clone(),
            status,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            attempts: 1,
            dry_run: false,
            records_processed: 0,
            records_succeeded: 0,
            records_failed: 0,
            payload: serde_json::Value::Null,
            error: None,
            skip_reason: None,
        }
    }

    pub fn succeeded(job: &Job, started_at: DateTime<Utc>, payload: serde_json::Value) -> Self {
        let mut result = Self::finish(job, JobStatus::Succeeded, started_at);
        result.payload = payload;
        result
    }

    pub fn failed(
        job: &Job,
        started_at: DateTime<Utc>,
        payload: serde_json::Value,
        error: JobError,
    ) -> Self {
        let mut result = Self::finish(job, JobStatus::Failed, started_at);
        result.payload = payload;
        result.error = Some(error);
        result
    }

    /// Job never ran.
    pub fn skipped(job: &Job, reason: impl Into<String>) -> Self {
        let mut result = Self::finish(job, JobStatus::Skipped, Utc::now());
        result.attempts = 0;
        result.skip_reason = Some(reason.into());
        result
    }

    /// Build a succeeded or failed result depending on `error`.
    pub fn from_outcome(
        job: &Job,
        started_at: DateTime<Utc>,
        payload: serde_json::Value,
        error: Option<JobError>,
    ) -> Self {
        match error {
            Some(error) => Self::failed(job, started_at, payload, error),
            None => Self::succeeded(job, started_at, payload),
        }
    }

    pub fn with_records(mut self, processed: u64, succeeded: u64, failed: u64) -> Self {
        self.records_processed = processed;
        self.records_succeeded = succeeded;
        self.records_failed = failed;
        self
    }

    pub fn as_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed && self.error.as_ref().is_some_and(JobError::is_transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobPayload;
    use crate::domain::model::TestSuite;

    fn job() -> Job {
        Job {
            id: "test_001_SMOKE".to_string(),
            kind: JobKind::Testing,
            sequence: 1,
            target_system: "DEV".to_string(),
            label: "Testing: SMOKE".to_string(),
            estimated_manual_hours: 1.0,
            estimated_minutes: 10.0,
            payload: JobPayload::Testing(TestSuite {
                id: "SMOKE".to_string(),
                target: "DEV".to_string(),
                description: None,
                cases: vec![],
            }),
        }
    }

    #[test]
    fn skipped_has_zero_attempts() {
        let result = JobResult::skipped(&job(), "cancelled");
        assert_eq!(result.status, JobStatus::Skipped);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.skip_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn transient_adapter_failure_is_retryable() {
        let err = JobError::adapter(&AdapterError::Unavailable("gateway busy".to_string()));
        let result = JobResult::failed(&job(), Utc::now(), serde_json::Value::Null, err);
        assert!(result.is_retryable());

        let err = JobError::assertion("expected 200, got 404");
        let result = JobResult::failed(&job(), Utc::now(), serde_json::Value::Null, err);
        assert!(!result.is_retryable());
    }

    #[test]
    fn failure_cause_serialises_with_type_tag() {
        let err = JobError::adapter(&AdapterError::Timeout { millis: 500 }).at_step(1);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["cause"]["type"], "adapter");
        assert_eq!(json["cause"]["transient"], true);
        assert_eq!(json["step_index"], 1);
    }
}
