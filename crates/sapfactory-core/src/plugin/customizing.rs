//! Customizing: apply a package's steps in order, stopping at the first failure.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{binding_problems, Plugin};
use crate::adapter::schema::PARAMETER_TABLE;
use crate::adapter::{Adapter, TableWrite};
use crate::domain::{
    CustomizingPackage, CustomizingStep, Job, JobError, JobKind, JobPayload, JobResult,
    PluginFault, Record, StepAction,
};

pub struct CustomizingPlugin;

#[derive(Debug, Serialize)]
struct StepOutcome {
    index: usize,
    action: &'static str,
    target: String,
    status: &'static str,
    message: String,
}

impl StepOutcome {
    fn new(index: usize, step: &CustomizingStep, status: &'static str, message: String) -> Self {
        Self {
            index,
            action: step.action.as_str(),
            target: step_target(step),
            status,
            message,
        }
    }
}

fn step_target(step: &CustomizingStep) -> String {
    match step.action {
        StepAction::SetTable => step.table.clone().unwrap_or_default(),
        StepAction::CallBapi => step.bapi.clone().unwrap_or_default(),
        StepAction::SetParameter => PARAMETER_TABLE.to_string(),
        StepAction::ExecuteReport => step.report.clone().unwrap_or_default(),
    }
}

fn package(job: &Job) -> Result<&CustomizingPackage, PluginFault> {
    match &job.payload {
        JobPayload::Customizing(pkg) => Ok(pkg),
        _ => Err(PluginFault::PayloadMismatch {
            job_id: job.id.clone(),
            expected: JobKind::Customizing,
        }),
    }
}

fn non_empty(record: &Option<Record>) -> bool {
    record.as_ref().is_some_and(|r| !r.is_empty())
}

fn present(value: &Option<String>) -> bool {
    value.as_ref().is_some_and(|v| !v.trim().is_empty())
}

/// Shape problem of a single step, if any.
fn step_problem(step: &CustomizingStep) -> Option<String> {
    match step.action {
        StepAction::SetTable if !present(&step.table) => Some("set_table needs a table".into()),
        StepAction::SetTable if !non_empty(&step.key) => Some("set_table needs a key".into()),
        StepAction::CallBapi if !present(&step.bapi) => Some("call_bapi needs a bapi".into()),
        StepAction::SetParameter if !non_empty(&step.params) => {
            Some("set_parameter needs params".into())
        }
        StepAction::ExecuteReport if !present(&step.report) => {
            Some("execute_report needs a report".into())
        }
        _ => None,
    }
}

fn describe(write: TableWrite) -> &'static str {
    match write {
        TableWrite::Inserted => "inserted",
        TableWrite::Updated => "updated",
    }
}

async fn apply_step(step: &CustomizingStep, adapter: &dyn Adapter) -> Result<String, JobError> {
    if let Some(problem) = step_problem(step) {
        return Err(JobError::invalid_payload(problem));
    }
    let empty = Record::new();
    match step.action {
        StepAction::SetTable => {
            let table = step.table.as_deref().unwrap_or_default();
            let key = step.key.as_ref().unwrap_or(&empty);
            let values = step.values.as_ref().unwrap_or(&empty);
            let write = adapter
                .set_table(table, key, values)
                .await
                .map_err(|e| JobError::adapter(&e))?;
            Ok(format!("{table} entry {}", describe(write)))
        }
        StepAction::CallBapi => {
            let bapi = step.bapi.as_deref().unwrap_or_default();
            let params = step.params.as_ref().unwrap_or(&empty);
            let response = adapter
                .call_bapi(bapi, params)
                .await
                .map_err(|e| JobError::adapter(&e))?;
            if response.is_success() {
                Ok(format!("{bapi}: {}", response.message))
            } else {
                Err(JobError::assertion(format!(
                    "{bapi} returned {}: {}",
                    response.return_type, response.message
                )))
            }
        }
        StepAction::SetParameter => {
            let params = step.params.as_ref().unwrap_or(&empty);
            for (name, value) in params {
                let key = Record::from([("PARAMID".to_string(), json!(name))]);
                let values = Record::from([("PARVA".to_string(), value.clone())]);
                adapter
                    .set_table(PARAMETER_TABLE, &key, &values)
                    .await
                    .map_err(|e| JobError::adapter(&e))?;
            }
            Ok(format!("{} parameter(s) set", params.len()))
        }
        StepAction::ExecuteReport => {
            let report = step.report.as_deref().unwrap_or_default();
            let body = step.params.as_ref().map(|p| json!(p));
            let endpoint = format!("/sap/bc/report/{report}");
            let response = adapter
                .request("POST", &endpoint, body.as_ref())
                .await
                .map_err(|e| JobError::adapter(&e))?;
            if response.status == 200 {
                Ok(format!("report {report} executed"))
            } else {
                Err(JobError::assertion(format!(
                    "report {report} returned status {}",
                    response.status
                )))
            }
        }
    }
}

#[async_trait]
impl Plugin for CustomizingPlugin {
    fn kind(&self) -> JobKind {
        JobKind::Customizing
    }

    async fn execute(&self, job: &Job, adapter: &dyn Adapter) -> Result<JobResult, PluginFault> {
        let pkg = package(job)?;
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(pkg.steps.len());
        let mut failure = None;

        for (index, step) in pkg.steps.iter().enumerate() {
            match apply_step(step, adapter).await {
                Ok(message) => {
                    debug!(job_id = %job.id, step = index, %message, "customizing step applied");
                    outcomes.push(StepOutcome::new(index, step, "succeeded", message));
                }
                Err(err) => {
                    warn!(job_id = %job.id, step = index, error = %err.message, "customizing step failed");
                    outcomes.push(StepOutcome::new(index, step, "failed", err.message.clone()));
                    failure = Some(err.at_step(index));
                    break;
                }
            }
        }

        let attempted = outcomes.len() as u64;
        let failed = u64::from(failure.is_some());
        let payload = json!({
            "package": pkg.id,
            "description": pkg.description,
            "steps_total": pkg.steps.len(),
            "steps_attempted": attempted,
            "steps": outcomes,
        });
        Ok(JobResult::from_outcome(job, started_at, payload, failure)
            .with_records(attempted, attempted - failed, failed))
    }

    fn dry_run(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        let mut problems = binding_problems(job, JobKind::Customizing);
        let mut first_invalid = None;
        let mut steps = Vec::new();

        if let JobPayload::Customizing(pkg) = &job.payload {
            for (index, step) in pkg.steps.iter().enumerate() {
                let (status, message) = match step_problem(step) {
                    Some(problem) => {
                        first_invalid.get_or_insert(index);
                        problems.push(format!("step {index}: {problem}"));
                        ("invalid", problem)
                    }
                    None => ("validated", "shape ok".to_string()),
                };
                steps.push(StepOutcome::new(index, step, status, message));
            }
        }

        let payload = json!({"steps": steps, "problems": problems});
        let error = (!problems.is_empty()).then(|| {
            let err = JobError::invalid_payload(problems.join("; "));
            match first_invalid {
                Some(index) => err.at_step(index),
                None => err,
            }
        });
        let total = steps.len() as u64;
        let invalid = steps.iter().filter(|s| s.status == "invalid").count() as u64;
        JobResult::from_outcome(job, started_at, payload, error)
            .with_records(total, total - invalid, invalid)
            .as_dry_run()
    }
}
