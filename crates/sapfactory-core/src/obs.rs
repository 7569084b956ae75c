//! Structured observability hooks for run and job lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`], attached to the run future
//!   with `tracing::Instrument`
//! - Emission functions for lifecycle events: run start, job start/finish,
//!   run finish, run fault and finalisation errors
//!
//! Events are emitted at `info!` level except faults (`error!`) and
//! finalisation problems (`warn!`). Output format is chosen by
//! [`crate::telemetry::init_tracing`].

use tracing::{error, info, warn};

use crate::domain::{JobKind, JobStatus, RunStatus};

/// Span tagged with the run id; every event inside a run inherits it.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("sapfactory.run", run_id = %run_id)
}

/// Emit event: run started for a project.
pub fn emit_run_started(run_id: &str, project: &str, dry_run: bool) {
    info!(event = "run.started", run_id = %run_id, project = %project, dry_run = dry_run);
}

/// Emit event: plan built.
pub fn emit_plan_built(run_id: &str, total_jobs: usize, model_digest: &str) {
    info!(
        event = "run.planned",
        run_id = %run_id,
        total_jobs = total_jobs,
        model_digest = %model_digest,
    );
}

/// Emit event: job entered `running`.
pub fn emit_job_started(job_id: &str, kind: JobKind, target_system: &str, attempt: u32) {
    info!(
        event = "job.started",
        job_id = %job_id,
        kind = %kind,
        target_system = %target_system,
        attempt = attempt,
    );
}

/// Emit event: job reached a terminal status.
pub fn emit_job_finished(job_id: &str, status: JobStatus, attempts: u32, duration_ms: i64) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        status = %status,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: run reached a terminal status.
pub fn emit_run_finished(
    run_id: &str,
    status: RunStatus,
    duration_ms: i64,
    total_jobs: usize,
    failed_jobs: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
        total_jobs = total_jobs,
        failed_jobs = failed_jobs,
    );
}

/// Emit event: infrastructure fault aborted the run.
pub fn emit_run_fault(run_id: &str, fault: &dyn std::fmt::Display) {
    error!(event = "run.fault", run_id = %run_id, error = %fault);
}

/// Emit event: run finalisation error (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}
