//! Run executor: plan, dispatch jobs to plugins, persist artifacts.
//!
//! One [`Executor::execute`] call drives a single run through
//! `created -> planning -> executing -> completed | failed`. Jobs run
//! sequentially in plan order. Every job ends terminal: plugin errors,
//! plugin panics and adapter errors become `failed` results; failure-policy
//! and cancellation skips become `skipped` results. Only a [`RunFault`]
//! (artifact storage, adapter lookup) stops the loop early, in which case the
//! remaining jobs are skipped and the run fails.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use sapfactory_state::{artifact_path, ArtifactCategory, ArtifactSink, RunId};

use crate::adapter::{Adapter, AdapterError, AdapterRegistry};
use crate::config::{FactoryConfig, FailurePolicy};
use crate::domain::{
    ImplementationModel, Job, JobError, JobResult, JobStatus, Plan, PluginFault, ProgressHandle,
    Run, RunFault, RunStatus, RunSummary,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::planner;
use crate::plugin::{Plugin, PluginSet};

/// Name of the plan artifact at the run root.
pub const PLAN_ARTIFACT: &str = "plan";

const CANCELLED: &str = "run cancelled";

/// Adapters of one run, keyed by target system id.
type AdapterMap = BTreeMap<String, Arc<dyn Adapter>>;

/// Shared services every run needs.
pub struct FactoryContext {
    pub adapters: Arc<AdapterRegistry>,
    pub sink: Arc<dyn ArtifactSink>,
    pub config: FactoryConfig,
}

impl FactoryContext {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        sink: Arc<dyn ArtifactSink>,
        config: FactoryConfig,
    ) -> Self {
        Self {
            adapters,
            sink,
            config,
        }
    }
}

/// Drives runs to completion. Cheap to clone; clones share the context.
#[derive(Clone)]
pub struct Executor {
    ctx: Arc<FactoryContext>,
    plugins: PluginSet,
}

impl Executor {
    pub fn new(ctx: Arc<FactoryContext>, plugins: PluginSet) -> Self {
        Self { ctx, plugins }
    }

    pub fn context(&self) -> &FactoryContext {
        &self.ctx
    }

    /// Execute `model` under a fresh run id with no cancellation source.
    pub async fn run(&self, model: &ImplementationModel, dry_run: bool) -> Run {
        let run_id = RunId::new();
        let progress = ProgressHandle::new(run_id.clone());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.execute(run_id, model, dry_run, &progress, cancel_rx)
            .await
    }

    /// Execute `model` as run `run_id`, publishing state to `progress`.
    ///
    /// Setting `cancel` to `true` skips every job that has not started yet;
    /// the job in flight finishes normally. Always returns a terminal run.
    pub async fn execute(
        &self,
        run_id: RunId,
        model: &ImplementationModel,
        dry_run: bool,
        progress: &ProgressHandle,
        cancel: watch::Receiver<bool>,
    ) -> Run {
        let span = obs::run_span(run_id.as_str());
        self.execute_inner(run_id, model, dry_run, progress, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        run_id: RunId,
        model: &ImplementationModel,
        dry_run: bool,
        progress: &ProgressHandle,
        cancel: watch::Receiver<bool>,
    ) -> Run {
        METRICS.inc_runs_started();
        let mut run = Run::new(run_id, &model.project.name, &model.project.customer, dry_run);
        obs::emit_run_started(run.run_id.as_str(), &run.project, dry_run);

        run.transition(RunStatus::Planning);
        progress.set_status(RunStatus::Planning);

        let plan = match planner::build_plan(model, &self.ctx.config.estimates) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(run_id = %run.run_id, error = %err, "model rejected by planner");
                run.error = Some(err.to_string());
                return self.finalize(run, RunStatus::Failed, progress, &[]).await;
            }
        };
        obs::emit_plan_built(run.run_id.as_str(), plan.total_jobs(), &plan.model_digest);
        progress.set_plan(&plan);
        run.plan = Some(plan.clone());

        let mut artifacts: Vec<(String, String)> = Vec::new();
        if let Err(fault) = self.write_plan(&run.run_id, &plan).await {
            return self
                .abort(run, &plan, fault, progress, &artifacts, &AdapterMap::new())
                .await;
        }

        run.transition(RunStatus::Executing);
        progress.set_status(RunStatus::Executing);

        let adapters = if dry_run {
            AdapterMap::new()
        } else {
            match self.create_adapters(model, &plan).await {
                Ok(adapters) => adapters,
                Err(fault) => {
                    return self
                        .abort(run, &plan, fault, progress, &artifacts, &AdapterMap::new())
                        .await
                }
            }
        };

        let mut halted = false;
        let mut failed_systems: BTreeSet<String> = BTreeSet::new();
        let mut cancelled = false;

        for job in &plan.jobs {
            let result = if *cancel.borrow() {
                cancelled = true;
                JobResult::skipped(job, CANCELLED)
            } else if let Some(reason) = self.policy_skip(job, halted, &failed_systems) {
                JobResult::skipped(job, reason)
            } else {
                self.run_job(job, adapters.get(&job.target_system), dry_run, progress)
                    .await
            };

            if result.status == JobStatus::Failed {
                halted = true;
                failed_systems.insert(job.target_system.clone());
            }
            record_outcome(&result, progress);

            match self.write_job_artifact(&run.run_id, job, &result).await {
                Ok(path) => {
                    artifacts.push((job.id.clone(), path));
                    run.results.push(result);
                }
                Err(fault) => {
                    run.results.push(result);
                    return self
                        .abort(run, &plan, fault, progress, &artifacts, &adapters)
                        .await;
                }
            }
        }

        disconnect_all(&adapters).await;

        let status = if cancelled {
            run.error = Some(CANCELLED.to_string());
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.finalize(run, status, progress, &artifacts).await
    }

    fn policy_skip(
        &self,
        job: &Job,
        halted: bool,
        failed_systems: &BTreeSet<String>,
    ) -> Option<String> {
        match self.ctx.config.failure_policy {
            FailurePolicy::Continue => None,
            FailurePolicy::Stop if halted => {
                Some("skipped after an earlier job failed (policy: stop)".to_string())
            }
            FailurePolicy::SkipSameSystem if failed_systems.contains(&job.target_system) => {
                Some(format!(
                    "skipped after a job on {} failed (policy: skip_same_system)",
                    job.target_system
                ))
            }
            _ => None,
        }
    }

    /// One adapter per target system, created through the configured factory.
    /// On failure the adapters created so far are released before returning.
    async fn create_adapters(
        &self,
        model: &ImplementationModel,
        plan: &Plan,
    ) -> Result<AdapterMap, RunFault> {
        let name = &self.ctx.config.adapter;
        let targets = plan.target_systems();
        let mut adapters = AdapterMap::new();
        for system in model
            .landscape
            .systems
            .iter()
            .filter(|s| targets.contains(&s.id.as_str()))
        {
            match self.ctx.adapters.create(name, system) {
                Ok(adapter) => {
                    adapters.insert(system.id.clone(), adapter);
                }
                Err(source) => {
                    disconnect_all(&adapters).await;
                    return Err(RunFault::AdapterLookup {
                        adapter: name.clone(),
                        system: system.id.clone(),
                        source,
                    });
                }
            }
        }
        Ok(adapters)
    }

    async fn run_job(
        &self,
        job: &Job,
        adapter: Option<&Arc<dyn Adapter>>,
        dry_run: bool,
        progress: &ProgressHandle,
    ) -> JobResult {
        progress.job_running(&job.id, &job.label);
        let plugin = self.plugins.get(job.kind);

        if dry_run {
            obs::emit_job_started(&job.id, job.kind, &job.target_system, 1);
            let started_at = Utc::now();
            return std::panic::catch_unwind(AssertUnwindSafe(|| plugin.dry_run(job)))
                .unwrap_or_else(|panic| {
                    let fault = PluginFault::Panicked {
                        message: panic_message(panic.as_ref()),
                    };
                    JobResult::failed(
                        job,
                        started_at,
                        serde_json::Value::Null,
                        JobError::plugin_fault(&fault),
                    )
                    .as_dry_run()
                });
        }

        let retry = &self.ctx.config.retry;
        let max_attempts = retry.attempts();
        let mut attempt = 1;
        loop {
            obs::emit_job_started(&job.id, job.kind, &job.target_system, attempt);
            let mut result = attempt_job(job, plugin, adapter).await;
            result.attempts = attempt;

            if attempt >= max_attempts || !result.is_retryable() {
                return result;
            }

            METRICS.inc_job_retries();
            let delay = retry.backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16));
            warn!(
                job_id = %job.id,
                attempt,
                delay_ms = delay,
                error = ?result.error.as_ref().map(|e| &e.message),
                "transient job failure, retrying"
            );
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            attempt += 1;
        }
    }

    async fn write_plan(&self, run_id: &RunId, plan: &Plan) -> Result<String, RunFault> {
        let value = serde_json::to_value(plan).map_err(|source| RunFault::Serialization {
            what: "plan".to_string(),
            source,
        })?;
        self.ctx
            .sink
            .write_artifact(run_id, ArtifactCategory::Root, PLAN_ARTIFACT, &value)
            .await
            .map_err(|source| RunFault::Storage {
                path: format!("{PLAN_ARTIFACT}.json"),
                source,
            })
    }

    async fn write_job_artifact(
        &self,
        run_id: &RunId,
        job: &Job,
        result: &JobResult,
    ) -> Result<String, RunFault> {
        let value = serde_json::to_value(result).map_err(|source| RunFault::Serialization {
            what: format!("result of {}", job.id),
            source,
        })?;
        let category = job.kind.category();
        self.ctx
            .sink
            .write_artifact(run_id, category, &job.id, &value)
            .await
            .map_err(|source| RunFault::Storage {
                path: artifact_path(category, &job.id).unwrap_or_else(|_| job.id.clone()),
                source,
            })
    }

    /// Fail the run on an infrastructure fault. Jobs without a result are
    /// skipped and get no artifact.
    async fn abort(
        &self,
        mut run: Run,
        plan: &Plan,
        fault: RunFault,
        progress: &ProgressHandle,
        artifacts: &[(String, String)],
        adapters: &AdapterMap,
    ) -> Run {
        obs::emit_run_fault(run.run_id.as_str(), &fault);
        disconnect_all(adapters).await;
        let reason = format!("run aborted: {fault}");
        for job in plan.jobs.iter().skip(run.results.len()) {
            let result = JobResult::skipped(job, reason.clone());
            record_outcome(&result, progress);
            run.results.push(result);
        }
        run.error = Some(fault.to_string());
        self.finalize(run, RunStatus::Failed, progress, artifacts)
            .await
    }

    /// Compute and persist the summary, then move the run to `status`.
    async fn finalize(
        &self,
        mut run: Run,
        mut status: RunStatus,
        progress: &ProgressHandle,
        artifacts: &[(String, String)],
    ) -> Run {
        let finished_at = Utc::now();
        let estimated_hours = run
            .plan
            .as_ref()
            .map(|p| p.estimated_manual_hours)
            .unwrap_or(0.0);
        let mut summary = RunSummary::compute(&run, status, finished_at, estimated_hours, artifacts);

        if let Err(fault) = self.write_summary(&run.run_id, &summary).await {
            obs::emit_run_finalize_error(run.run_id.as_str(), &fault);
            if status == RunStatus::Completed {
                status = RunStatus::Failed;
                run.error = Some(fault.to_string());
                summary = RunSummary::compute(&run, status, finished_at, estimated_hours, artifacts);
            }
        }

        run.transition(status);
        run.finished_at = Some(finished_at);
        run.summary = Some(summary.clone());
        progress.finish(run.status, Some(summary));

        obs::emit_run_finished(
            run.run_id.as_str(),
            run.status,
            (finished_at - run.started_at).num_milliseconds(),
            run.plan.as_ref().map(Plan::total_jobs).unwrap_or(0),
            run.count(JobStatus::Failed),
        );
        info!(
            run_id = %run.run_id,
            completed = run.count(JobStatus::Succeeded),
            failed = run.count(JobStatus::Failed),
            skipped = run.count(JobStatus::Skipped),
            "run finished"
        );
        METRICS.inc_runs_finished();
        METRICS.flush();
        run
    }

    async fn write_summary(&self, run_id: &RunId, summary: &RunSummary) -> Result<String, RunFault> {
        let value = serde_json::to_value(summary).map_err(|source| RunFault::Serialization {
            what: "summary".to_string(),
            source,
        })?;
        self.ctx
            .sink
            .write_summary(run_id, &value)
            .await
            .map_err(|source| RunFault::Storage {
                path: sapfactory_state::SUMMARY_FILE.to_string(),
                source,
            })
    }
}

/// Connect, then hand the job to its plugin. Never panics outward.
async fn attempt_job(
    job: &Job,
    plugin: &dyn Plugin,
    adapter: Option<&Arc<dyn Adapter>>,
) -> JobResult {
    let started_at = Utc::now();
    let failed = |error: JobError| JobResult::failed(job, started_at, serde_json::Value::Null, error);

    let Some(adapter) = adapter else {
        let fault = PluginFault::Internal(format!("no adapter bound to {}", job.target_system));
        return failed(JobError::plugin_fault(&fault));
    };

    match adapter.connect().await {
        Ok(true) => {}
        Ok(false) => {
            let err = AdapterError::NotConnected {
                system: job.target_system.clone(),
            };
            return failed(JobError::adapter(&err));
        }
        Err(err) => return failed(JobError::adapter(&err)),
    }

    match AssertUnwindSafe(plugin.execute(job, adapter.as_ref()))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(fault)) => {
            warn!(job_id = %job.id, plugin = plugin.name(), error = %fault, "plugin fault");
            failed(JobError::plugin_fault(&fault))
        }
        Err(panic) => {
            let fault = PluginFault::Panicked {
                message: panic_message(panic.as_ref()),
            };
            warn!(job_id = %job.id, plugin = plugin.name(), error = %fault, "plugin panicked");
            failed(JobError::plugin_fault(&fault))
        }
    }
}

async fn disconnect_all(adapters: &AdapterMap) {
    for adapter in adapters.values() {
        if let Err(err) = adapter.disconnect().await {
            debug!(system = %adapter.system_id(), error = %err, "disconnect failed");
        }
    }
}

fn record_outcome(result: &JobResult, progress: &ProgressHandle) {
    match result.status {
        JobStatus::Succeeded => METRICS.inc_jobs_succeeded(),
        JobStatus::Failed => METRICS.inc_jobs_failed(),
        JobStatus::Skipped => METRICS.inc_jobs_skipped(),
        JobStatus::Pending | JobStatus::Running => {}
    }
    progress.job_finished(&result.job_id, result.status);
    obs::emit_job_finished(
        &result.job_id,
        result.status,
        result.attempts,
        result.duration_ms,
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
