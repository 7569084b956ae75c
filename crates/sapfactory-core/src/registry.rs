//! Process-wide registry of submitted runs.
//!
//! Each submitted run executes on its own tokio task and owns a
//! [`ProgressHandle`] the registry reads from, so status queries never wait
//! on the executor. Runs stay registered after they finish.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use sapfactory_state::{ArtifactInfo, RunId, StorageError};

use crate::domain::{
    FactoryError, ImplementationModel, JobState, ProgressHandle, Result, Run, RunStatus,
    RunSummary,
};
use crate::executor::Executor;

/// Status of one run as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    pub run_id: RunId,
    pub project: String,
    pub dry_run: bool,
    pub submitted_at: DateTime<Utc>,
    pub status: RunStatus,
    pub progress_percent: f64,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub current_job: Option<String>,
    pub jobs: Vec<JobState>,
    pub summary: Option<RunSummary>,
}

struct RunEntry {
    run_id: RunId,
    project: String,
    dry_run: bool,
    submitted_at: DateTime<Utc>,
    progress: ProgressHandle,
    cancel: watch::Sender<bool>,
    done: watch::Receiver<Option<Arc<Run>>>,
}

impl RunEntry {
    fn view(&self) -> RunView {
        let progress = self.progress.snapshot();
        RunView {
            run_id: self.run_id.clone(),
            project: self.project.clone(),
            dry_run: self.dry_run,
            submitted_at: self.submitted_at,
            status: progress.status,
            progress_percent: progress.progress_percent(),
            total_jobs: progress.total_jobs,
            completed_jobs: progress.completed_jobs,
            current_job: progress.current_job,
            jobs: progress.jobs,
            summary: progress.summary,
        }
    }
}

/// Tracks active and finished runs by id.
pub struct RunRegistry {
    executor: Executor,
    runs: RwLock<Vec<Arc<RunEntry>>>,
}

impl RunRegistry {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            runs: RwLock::new(Vec::new()),
        }
    }

    /// Start `model` in the background and return its run id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, model: ImplementationModel, dry_run: bool) -> RunId {
        let run_id = RunId::new();
        let progress = ProgressHandle::new(run_id.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);

        let entry = Arc::new(RunEntry {
            run_id: run_id.clone(),
            project: model.project.name.clone(),
            dry_run,
            submitted_at: Utc::now(),
            progress: progress.clone(),
            cancel: cancel_tx,
            done: done_rx,
        });
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);

        info!(run_id = %run_id, project = %model.project.name, dry_run, "run submitted");

        let executor = self.executor.clone();
        let task_run_id = run_id.clone();
        tokio::spawn(async move {
            let run = executor
                .execute(task_run_id, &model, dry_run, &progress, cancel_rx)
                .await;
            let _ = done_tx.send(Some(Arc::new(run)));
        });

        run_id
    }

    fn entry(&self, run_id: &RunId) -> Result<Arc<RunEntry>> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| &e.run_id == run_id)
            .cloned()
            .ok_or_else(|| FactoryError::RunNotFound(run_id.to_string()))
    }

    pub fn status(&self, run_id: &RunId) -> Result<RunView> {
        Ok(self.entry(run_id)?.view())
    }

    /// Request cancellation. Returns `false` if the run had already finished.
    pub fn cancel(&self, run_id: &RunId) -> Result<bool> {
        let entry = self.entry(run_id)?;
        if entry.done.borrow().is_some() || entry.progress.snapshot().status.is_terminal() {
            return Ok(false);
        }
        entry.cancel.send_replace(true);
        info!(run_id = %run_id, "run cancellation requested");
        Ok(true)
    }

    /// Wait until the run is terminal and return it.
    pub async fn wait(&self, run_id: &RunId) -> Result<Arc<Run>> {
        let mut done = self.entry(run_id)?.done.clone();
        let finished = done
            .wait_for(Option::is_some)
            .await
            .map(|run| Option::clone(&run))
            .map_err(|_| FactoryError::RunAborted(run_id.to_string()))?;
        finished.ok_or_else(|| FactoryError::RunAborted(run_id.to_string()))
    }

    /// The finished run, if it has finished.
    pub fn result(&self, run_id: &RunId) -> Result<Option<Arc<Run>>> {
        Ok(self.entry(run_id)?.done.borrow().clone())
    }

    /// Every registered run in submission order.
    pub fn list(&self) -> Vec<RunView> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.view())
            .collect()
    }

    /// Artifacts written so far for a registered run.
    pub async fn artifacts(&self, run_id: &RunId) -> Result<Vec<ArtifactInfo>> {
        self.entry(run_id)?;
        match self.executor.context().sink.list_artifacts(run_id).await {
            Ok(artifacts) => Ok(artifacts),
            Err(StorageError::RunNotFound { .. }) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// One artifact of a registered run by run-relative path.
    pub async fn artifact(&self, run_id: &RunId, path: &str) -> Result<serde_json::Value> {
        self.entry(run_id)?;
        Ok(self
            .executor
            .context()
            .sink
            .read_artifact(run_id, path)
            .await?)
    }
}
