//! Run aggregate, progress tracking and KPI summary.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sapfactory_state::RunId;

use crate::domain::job::{JobKind, Plan};
use crate::domain::result::{JobResult, JobStatus};

/// Run lifecycle: `created -> planning -> executing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Planning => "planning",
            RunStatus::Executing => "executing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Created, RunStatus::Planning)
                | (RunStatus::Planning, RunStatus::Executing)
                | (RunStatus::Planning, RunStatus::Failed)
                | (RunStatus::Executing, RunStatus::Completed)
                | (RunStatus::Executing, RunStatus::Failed)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a plan. Mutated only by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub status: RunStatus,
    pub project: String,
    pub customer: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub plan: Option<Plan>,
    /// Results in plan order; never longer than the plan.
    pub results: Vec<JobResult>,
    /// Planner rejection or run fault, if any.
    pub error: Option<String>,
    /// Set once every job is terminal.
    pub summary: Option<RunSummary>,
}

impl Run {
    pub fn new(run_id: RunId, project: &str, customer: &str, dry_run: bool) -> Self {
        Self {
            run_id,
            status: RunStatus::Created,
            project: project.to_string(),
            customer: customer.to_string(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            plan: None,
            results: Vec::new(),
            error: None,
            summary: None,
        }
    }

    /// Advance the lifecycle; illegal transitions are ignored and reported.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                run_id = %self.run_id,
                from = %self.status,
                to = %next,
                "ignoring illegal run transition"
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Entry of the summary's job index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobIndexEntry {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// KPI block written as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub project: String,
    pub customer: String,
    pub status: RunStatus,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub total_jobs: usize,
    /// Jobs that succeeded.
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,

    pub total_records: u64,
    pub success_records: u64,
    pub failed_records: u64,

    /// succeeded / total, in percent.
    pub success_rate: f64,
    /// Jobs executed without manual intervention (succeeded or failed) / total, in percent.
    pub automation_rate: f64,
    pub estimated_manual_hours: f64,
    pub actual_hours: f64,
    /// `(estimated - actual) / estimated * 100`, clamped to `[0, 100]`.
    pub cost_savings_percent: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub jobs: Vec<JobIndexEntry>,
}

impl RunSummary {
    /// Compute the summary for a run whose jobs are all terminal.
    ///
    /// `total_jobs` is the plan length; `artifacts` pairs job ids with the
    /// path their result was stored under.
    pub fn compute(
        run: &Run,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        estimated_manual_hours: f64,
        artifacts: &[(String, String)],
    ) -> Self {
        let total_jobs = run.plan.as_ref().map(Plan::total_jobs).unwrap_or(0);
        let completed_jobs = run.count(JobStatus::Succeeded);
        let failed_jobs = run.count(JobStatus::Failed);
        let skipped_jobs = run.count(JobStatus::Skipped);

        let duration_seconds =
            ((finished_at - run.started_at).num_milliseconds().max(0) as f64) / 1000.0;
        let actual_hours = duration_seconds / 3600.0;

        let rate = |n: usize| {
            if total_jobs == 0 {
                0.0
            } else {
                n as f64 / total_jobs as f64 * 100.0
            }
        };

        let jobs = run
            .results
            .iter()
            .map(|r| JobIndexEntry {
                job_id: r.job_id.clone(),
                kind: r.kind,
                status: r.status,
                artifact: artifacts
                    .iter()
                    .find(|(id, _)| *id == r.job_id)
                    .map(|(_, path)| path.clone()),
            })
            .collect();

        Self {
            run_id: run.run_id.clone(),
            project: run.project.clone(),
            customer: run.customer.clone(),
            status,
            dry_run: run.dry_run,
            started_at: run.started_at,
            finished_at,
            duration_seconds,
            total_jobs,
            completed_jobs,
            failed_jobs,
            skipped_jobs,
            total_records: run.results.iter().map(|r| r.records_processed).sum(),
            success_records: run.results.iter().map(|r| r.records_succeeded).sum(),
            failed_records: run.results.iter().map(|r| r.records_failed).sum(),
            success_rate: rate(completed_jobs),
            automation_rate: rate(completed_jobs + failed_jobs),
            estimated_manual_hours,
            actual_hours,
            cost_savings_percent: cost_savings_percent(estimated_manual_hours, actual_hours),
            error: run.error.clone(),
            jobs,
        }
    }
}

/// `(estimated - actual) / estimated * 100` in `[0, 100]`; 0 without an estimate.
pub fn cost_savings_percent(estimated_hours: f64, actual_hours: f64) -> f64 {
    if estimated_hours <= 0.0 {
        return 0.0;
    }
    ((estimated_hours - actual_hours) / estimated_hours * 100.0).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Per-job state as seen by progress pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub status: JobStatus,
}

/// Point-in-time view of a run, independent of the executor's own state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: RunId,
    pub status: RunStatus,
    pub total_jobs: usize,
    /// Jobs in a terminal state.
    pub completed_jobs: usize,
    pub current_job: Option<String>,
    pub jobs: Vec<JobState>,
    pub summary: Option<RunSummary>,
}

impl RunProgress {
    pub fn progress_percent(&self) -> f64 {
        if self.total_jobs == 0 {
            return if self.status.is_terminal() { 100.0 } else { 0.0 };
        }
        self.completed_jobs as f64 / self.total_jobs as f64 * 100.0
    }
}

/// Shared, independently owned progress cell for one run.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    inner: Arc<RwLock<RunProgress>>,
}

impl ProgressHandle {
    pub fn new(run_id: RunId) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RunProgress {
                run_id,
                status: RunStatus::Created,
                total_jobs: 0,
                completed_jobs: 0,
                current_job: None,
                jobs: Vec::new(),
                summary: None,
            })),
        }
    }

    pub fn snapshot(&self) -> RunProgress {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut RunProgress)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    pub fn set_status(&self, status: RunStatus) {
        self.update(|p| p.status = status);
    }

    /// Register the planned jobs, all `pending`.
    pub fn set_plan(&self, plan: &Plan) {
        self.update(|p| {
            p.total_jobs = plan.total_jobs();
            p.completed_jobs = 0;
            p.jobs = plan
                .jobs
                .iter()
                .map(|j| JobState {
                    job_id: j.id.clone(),
                    status: JobStatus::Pending,
                })
                .collect();
        });
    }

    pub fn job_running(&self, job_id: &str, label: &str) {
        self.update(|p| {
            p.current_job = Some(label.to_string());
            if let Some(state) = p.jobs.iter_mut().find(|s| s.job_id == job_id) {
                state.status = JobStatus::Running;
            }
        });
    }

    /// Record a terminal job transition and bump the completed count.
    pub fn job_finished(&self, job_id: &str, status: JobStatus) {
        self.update(|p| {
            if let Some(state) = p.jobs.iter_mut().find(|s| s.job_id == job_id) {
                if !state.status.is_terminal() {
                    p.completed_jobs += 1;
                }
                state.status = status;
            }
        });
    }

    pub fn finish(&self, status: RunStatus, summary: Option<RunSummary>) {
        self.update(|p| {
            p.status = status;
            p.current_job = None;
            p.summary = summary;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lifecycle_rejects_skips() {
        let mut run = Run::new(RunId::new(), "P", "C", false);
        assert!(!run.transition(RunStatus::Executing));
        assert!(run.transition(RunStatus::Planning));
        assert!(run.transition(RunStatus::Executing));
        assert!(run.transition(RunStatus::Completed));
        assert!(!run.transition(RunStatus::Failed));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn cost_savings_is_clamped() {
        assert_eq!(cost_savings_percent(0.0, 1.0), 0.0);
        assert_eq!(cost_savings_percent(10.0, 20.0), 0.0);
        assert!((cost_savings_percent(10.0, 1.0) - 90.0).abs() < 1e-9);
        assert_eq!(cost_savings_percent(10.0, 0.0), 100.0);
    }

    #[test]
    fn progress_counts_terminal_transitions_once() {
        let handle = ProgressHandle::new(RunId::from("run-p"));
        handle.update(|p| {
            p.total_jobs = 2;
            p.jobs = vec![
                JobState {
                    job_id: "a".to_string(),
                    status: JobStatus::Pending,
                },
                JobState {
                    job_id: "b".to_string(),
                    status: JobStatus::Pending,
                },
            ];
        });
        handle.job_running("a", "Job A");
        assert_eq!(handle.snapshot().current_job.as_deref(), Some("Job A"));
        handle.job_finished("a", JobStatus::Succeeded);
        handle.job_finished("a", JobStatus::Succeeded);

        let snap = handle.snapshot();
        assert_eq!(snap.completed_jobs, 1);
        assert!((snap.progress_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_terminal_run_reports_full_progress() {
        let handle = ProgressHandle::new(RunId::from("run-empty"));
        assert_eq!(handle.snapshot().progress_percent(), 0.0);
        handle.finish(RunStatus::Failed, None);
        assert_eq!(handle.snapshot().progress_percent(), 100.0);
    }
}
