//! Testing: run every case of a suite and keep all outcomes.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{binding_problems, Plugin};
use crate::adapter::Adapter;
use crate::domain::{
    CaseType, Job, JobError, JobKind, JobPayload, JobResult, PluginFault, ProcessStep, Record,
    TestCase, TestSuite,
};

pub struct TestingPlugin;

/// Process used by a `process` case that names neither steps nor a process.
const DEFAULT_PROCESS: &str = "ORDER_TO_CASH";

const HEALTH_ENDPOINT: &str = "/sap/health";

#[derive(Debug, Serialize)]
struct StepCheck {
    name: String,
    passed: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct CaseOutcome {
    id: String,
    #[serde(rename = "type")]
    case_type: &'static str,
    passed: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    process: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    steps: Vec<StepCheck>,
}

type Check = Result<String, JobError>;

fn suite(job: &Job) -> Result<&TestSuite, PluginFault> {
    match &job.payload {
        JobPayload::Testing(suite) => Ok(suite),
        _ => Err(PluginFault::PayloadMismatch {
            job_id: job.id.clone(),
            expected: JobKind::Testing,
        }),
    }
}

fn case_problem(case: &TestCase) -> Option<String> {
    let blank = |v: &Option<String>| v.as_ref().map_or(true, |s| s.trim().is_empty());
    match case.case_type {
        CaseType::Api if blank(&case.endpoint) => Some("api case needs an endpoint".into()),
        CaseType::Bapi if blank(&case.bapi) => Some("bapi case needs a bapi".into()),
        CaseType::Process => case
            .steps
            .iter()
            .find(|s| blank(&s.endpoint) && blank(&s.bapi))
            .map(|s| format!("process step '{}' needs an endpoint or a bapi", s.name)),
        CaseType::Data if blank(&case.table) => Some("data case needs a table".into()),
        _ => None,
    }
}

/// Step names of the well-known end-to-end processes.
fn process_step_names(process: &str) -> &'static [&'static str] {
    match process {
        "ORDER_TO_CASH" => &[
            "Create Sales Order",
            "Check Availability",
            "Create Delivery",
            "Post Goods Issue",
            "Create Invoice",
            "Post Payment",
        ],
        "PROCURE_TO_PAY" => &[
            "Create Purchase Requisition",
            "Create Purchase Order",
            "Goods Receipt",
            "Invoice Verification",
            "Payment Processing",
        ],
        "RECORD_TO_REPORT" => &[
            "Post Journal Entry",
            "Run Depreciation",
            "Period Close",
            "Generate Reports",
        ],
        "HIRE_TO_RETIRE" => &["Create Employee", "Assign Position", "Process Payroll"],
        _ => &["Initialize", "Execute", "Validate"],
    }
}

fn slug(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "_")
}

/// Gateway steps for a named process: one `POST /sap/process/<process>/<step>` each.
fn default_process_steps(process: &str) -> Vec<ProcessStep> {
    process_step_names(process)
        .iter()
        .map(|name| ProcessStep {
            name: name.to_string(),
            endpoint: Some(format!("/sap/process/{}/{}", slug(process), slug(name))),
            method: "POST".to_string(),
            expected_status: None,
            bapi: None,
            params: Record::new(),
        })
        .collect()
}

fn process_name(case: &TestCase) -> &str {
    case.process.as_deref().unwrap_or(DEFAULT_PROCESS)
}

/// Declared steps, or the named process's defaults when none are declared.
fn case_steps(case: &TestCase) -> Cow<'_, [ProcessStep]> {
    if case.steps.is_empty() {
        Cow::Owned(default_process_steps(process_name(case)))
    } else {
        Cow::Borrowed(&case.steps)
    }
}

/// Fields of `expected` missing from or different in `actual`.
fn data_mismatch(expected: &Record, actual: &Value) -> Option<String> {
    let lookup = |k: &str| actual.get(k).or_else(|| actual.get("d").and_then(|d| d.get(k)));
    expected
        .iter()
        .find(|(k, v)| lookup(k.as_str()) != Some(*v))
        .map(|(k, v)| {
            let got = lookup(k.as_str()).unwrap_or(&Value::Null);
            format!("expected {k} = {v}, got {got}")
        })
}

async fn check_request(
    adapter: &dyn Adapter,
    method: &str,
    endpoint: &str,
    body: Option<&Value>,
    expected_status: Option<u16>,
    expected_data: Option<&Record>,
) -> Check {
    let expected = expected_status.unwrap_or(200);
    let response = adapter
        .request(method, endpoint, body)
        .await
        .map_err(|e| JobError::adapter(&e))?;
    if response.status != expected {
        return Err(JobError::assertion(format!(
            "{method} {endpoint}: expected status {expected}, got {}",
            response.status
        )));
    }
    if let Some(expected_data) = expected_data {
        let body = response.body.unwrap_or(Value::Null);
        if let Some(diff) = data_mismatch(expected_data, &body) {
            return Err(JobError::assertion(format!("{endpoint}: {diff}")));
        }
    }
    Ok(format!("{method} {endpoint} -> {}", response.status))
}

async fn check_bapi(
    adapter: &dyn Adapter,
    bapi: &str,
    params: &Record,
    expected_data: Option<&Record>,
) -> Check {
    let response = adapter
        .call_bapi(bapi, params)
        .await
        .map_err(|e| JobError::adapter(&e))?;
    if !response.is_success() {
        return Err(JobError::assertion(format!(
            "{bapi} returned {}: {}",
            response.return_type, response.message
        )));
    }
    if let Some(expected_data) = expected_data {
        let data = serde_json::to_value(&response.data).unwrap_or(Value::Null);
        if let Some(diff) = data_mismatch(expected_data, &data) {
            return Err(JobError::assertion(format!("{bapi}: {diff}")));
        }
    }
    Ok(format!("{bapi}: {}", response.message))
}

async fn check_process_step(adapter: &dyn Adapter, step: &ProcessStep) -> Check {
    match (&step.bapi, &step.endpoint) {
        (Some(bapi), _) => check_bapi(adapter, bapi, &step.params, None).await,
        (None, Some(endpoint)) => {
            let body = (!step.params.is_empty()).then(|| json!(step.params));
            check_request(
                adapter,
                &step.method,
                endpoint,
                body.as_ref(),
                step.expected_status,
                None,
            )
            .await
        }
        (None, None) => Err(JobError::invalid_payload(format!(
            "process step '{}' needs an endpoint or a bapi",
            step.name
        ))),
    }
}

async fn check_data(adapter: &dyn Adapter, case: &TestCase) -> Check {
    let table = case.table.as_deref().unwrap_or_default();
    let rows = adapter
        .read_table(table, case.expected_key.as_ref())
        .await
        .map_err(|e| JobError::adapter(&e))?;
    match (case.expected_count, &case.expected_key) {
        (Some(expected), _) if rows.len() < expected => Err(JobError::assertion(format!(
            "{table}: expected at least {expected} row(s), found {}",
            rows.len()
        ))),
        (None, Some(_)) if rows.is_empty() => Err(JobError::assertion(format!(
            "{table}: no row matches the expected key"
        ))),
        _ => Ok(format!("{table}: {} row(s)", rows.len())),
    }
}

async fn check_integration(adapter: &dyn Adapter, case: &TestCase) -> Check {
    let source = case.source.as_deref().unwrap_or("SAP");
    let target = case.target.as_deref().unwrap_or("External");
    let response = adapter
        .request("GET", HEALTH_ENDPOINT, None)
        .await
        .map_err(|e| JobError::adapter(&e))?;
    if response.status != 200 {
        return Err(JobError::assertion(format!(
            "{source} -> {target}: connectivity failed with status {}",
            response.status
        )));
    }
    Ok(format!("{source} -> {target}: connectivity OK"))
}

struct CaseRun {
    outcome: CaseOutcome,
    error: Option<JobError>,
}

async fn run_case(adapter: &dyn Adapter, case: &TestCase) -> CaseRun {
    let mut steps = Vec::new();
    let mut process = None;
    let check = match case_problem(case) {
        Some(problem) => Err(JobError::invalid_payload(problem)),
        None => match case.case_type {
            CaseType::Api => {
                let endpoint = case.endpoint.as_deref().unwrap_or_default();
                check_request(
                    adapter,
                    &case.method,
                    endpoint,
                    case.body.as_ref(),
                    case.expected_status,
                    case.expected_data.as_ref(),
                )
                .await
            }
            CaseType::Bapi => {
                let bapi = case.bapi.as_deref().unwrap_or_default();
                check_bapi(adapter, bapi, &case.params, case.expected_data.as_ref()).await
            }
            CaseType::Process => {
                if case.steps.is_empty() {
                    process = Some(process_name(case).to_string());
                }
                let mut first_error = None;
                for step in case_steps(case).iter() {
                    let check = check_process_step(adapter, step).await;
                    let (passed, message) = match check {
                        Ok(message) => (true, message),
                        Err(err) => {
                            let message = err.message.clone();
                            first_error.get_or_insert(err);
                            (false, message)
                        }
                    };
                    steps.push(StepCheck {
                        name: step.name.clone(),
                        passed,
                        message,
                    });
                }
                let passed = steps.iter().filter(|s| s.passed).count();
                match first_error {
                    Some(err) => Err(err),
                    None => Ok(format!("{passed}/{} steps passed", steps.len())),
                }
            }
            CaseType::Data => check_data(adapter, case).await,
            CaseType::Integration => check_integration(adapter, case).await,
        },
    };

    let (passed, message, error) = match check {
        Ok(message) => (true, message, None),
        Err(err) => (false, err.message.clone(), Some(err)),
    };
    CaseRun {
        outcome: CaseOutcome {
            id: case.id.clone(),
            case_type: case.case_type.as_str(),
            passed,
            message,
            process,
            steps,
        },
        error,
    }
}

#[async_trait]
impl Plugin for TestingPlugin {
    fn kind(&self) -> JobKind {
        JobKind::Testing
    }

    async fn execute(&self, job: &Job, adapter: &dyn Adapter) -> Result<JobResult, PluginFault> {
        let suite = suite(job)?;
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(suite.cases.len());
        let mut failures: Vec<(usize, JobError)> = Vec::new();

        for (index, case) in suite.cases.iter().enumerate() {
            let run = run_case(adapter, case).await;
            debug!(job_id = %job.id, case = %case.id, passed = run.outcome.passed, "test case finished");
            if let Some(err) = run.error {
                failures.push((index, err));
            }
            outcomes.push(run.outcome);
        }

        let total = outcomes.len() as u64;
        let failed = failures.len() as u64;
        let passed = total - failed;
        info!(job_id = %job.id, suite = %suite.id, passed, failed, "test suite finished");

        // A transient adapter failure takes precedence so the job stays retryable.
        let error = match failures.iter().position(|(_, e)| e.is_transient()) {
            Some(pos) => Some(failures.swap_remove(pos)),
            None => failures.into_iter().next(),
        }
        .map(|(index, err)| {
            let err = err.at_step(index);
            if failed > 1 {
                JobError {
                    message: format!("{failed} of {total} cases failed; first: {}", err.message),
                    ..err
                }
            } else {
                err
            }
        });

        let pass_rate = if total == 0 {
            0.0
        } else {
            (passed as f64 / total as f64 * 10000.0).round() / 100.0
        };
        let payload = json!({
            "suite": suite.id,
            "description": suite.description,
            "total": total,
            "passed": passed,
            "failed": failed,
            "pass_rate_percent": pass_rate,
            "cases": outcomes,
        });
        Ok(JobResult::from_outcome(job, started_at, payload, error).with_records(total, passed, failed))
    }

    fn dry_run(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        let mut problems = binding_problems(job, JobKind::Testing);
        let mut cases = Vec::new();

        if let JobPayload::Testing(suite) = &job.payload {
            if suite.cases.is_empty() {
                problems.push("suite has no cases".to_string());
            }
            for case in &suite.cases {
                let problem = case_problem(case);
                if let Some(problem) = &problem {
                    problems.push(format!("case {}: {problem}", case.id));
                }
                cases.push(json!({
                    "id": case.id,
                    "type": case.case_type.as_str(),
                    "status": if problem.is_some() { "invalid" } else { "validated" },
                }));
            }
        }

        let total = cases.len() as u64;
        let invalid = cases.iter().filter(|c| c["status"] == "invalid").count() as u64;
        let payload = json!({"cases": cases, "problems": problems});
        let error = (!problems.is_empty()).then(|| JobError::invalid_payload(problems.join("; ")));
        JobResult::from_outcome(job, started_at, payload, error)
            .with_records(total, total - invalid, invalid)
            .as_dry_run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, BapiResponse, FakeSapAdapter};
    use crate::domain::{FailureCause, JobStatus};

    fn job(cases: Vec<TestCase>) -> Job {
        Job {
            id: "test_001_SMOKE".to_string(),
            kind: JobKind::Testing,
            sequence: 1,
            target_system: "QAS".to_string(),
            label: "Testing: SMOKE".to_string(),
            estimated_manual_hours: cases.len() as f64,
            estimated_minutes: 10.0,
            payload: JobPayload::Testing(TestSuite {
                id: "SMOKE".to_string(),
                target: "QAS".to_string(),
                description: None,
                cases,
            }),
        }
    }

    fn bapi_case(id: &str, bapi: &str) -> TestCase {
        let mut case = TestCase::api(id, "/unused", 200);
        case.case_type = CaseType::Bapi;
        case.endpoint = None;
        case.bapi = Some(bapi.to_string());
        case
    }

    async fn adapter() -> FakeSapAdapter {
        let adapter = FakeSapAdapter::new("QAS", "200");
        adapter.connect().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn passing_suite_succeeds() {
        let adapter = adapter().await;
        let job = job(vec![
            TestCase::api("health", "/sap/health", 200),
            TestCase::api("bp", "/sap/opu/odata/sap/API_BUSINESS_PARTNER", 200),
            bapi_case("commit", "BAPI_TRANSACTION_COMMIT"),
        ]);
        let result = TestingPlugin.execute(&job, &adapter).await.unwrap();
        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.payload["passed"], 3);
        assert_eq!(result.records_succeeded, 3);
    }

    #[tokio::test]
    async fn all_cases_run_after_a_failure() {
        let adapter = adapter().await;
        let job = job(vec![
            TestCase::api("missing", "/nowhere", 200),
            TestCase::api("health", "/sap/health", 200),
        ]);
        let result = TestingPlugin.execute(&job, &adapter).await.unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.payload["cases"].as_array().unwrap().len(), 2);
        assert_eq!(result.payload["cases"][1]["passed"], true);
        let error = result.error.unwrap();
        assert_eq!(error.cause, FailureCause::Assertion);
        assert_eq!(error.step_index, Some(0));
    }

    #[tokio::test]
    async fn expected_data_is_compared() {
        let adapter = adapter().await;
        let mut case = TestCase::api("health", "/sap/health", 200);
        case.expected_data = Some(Record::from([("status".to_string(), json!("degraded"))]));
        let result = TestingPlugin.execute(&job(vec![case]), &adapter).await.unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.unwrap().message.contains("status"));
    }

    #[tokio::test]
    async fn bapi_return_code_is_asserted() {
        let adapter = FakeSapAdapter::new("QAS", "200")
            .with_bapi_response("Z_CHECK", BapiResponse::error("document locked"));
        adapter.connect().await.unwrap();
        let result = TestingPlugin
            .execute(&job(vec![bapi_case("check", "Z_CHECK")]), &adapter)
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.payload["cases"][0]["message"]
            .as_str()
            .unwrap()
            .contains("document locked"));
    }

    #[tokio::test]
    async fn process_runs_every_step() {
        let adapter = adapter().await;
        let mut case = TestCase::api("p2p", "/unused", 200);
        case.case_type = CaseType::Process;
        case.endpoint = None;
        case.steps = vec![
            ProcessStep {
                name: "create".to_string(),
                endpoint: Some("/missing".to_string()),
                method: "POST".to_string(),
                expected_status: Some(201),
                bapi: None,
                params: Record::new(),
            },
            ProcessStep {
                name: "commit".to_string(),
                endpoint: None,
                method: "GET".to_string(),
                expected_status: None,
                bapi: Some("BAPI_TRANSACTION_COMMIT".to_string()),
                params: Record::new(),
            },
        ];
        let result = TestingPlugin.execute(&job(vec![case]), &adapter).await.unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        let steps = &result.payload["cases"][0]["steps"];
        assert_eq!(steps[0]["passed"], false);
        assert_eq!(steps[1]["passed"], true);
    }

    #[tokio::test]
    async fn data_case_reads_table() {
        let adapter = adapter().await;
        let key = Record::from([("BUKRS".to_string(), json!("1000"))]);
        adapter.set_table("T001", &key, &Record::new()).await.unwrap();

        let mut case = TestCase::api("t001", "/unused", 200);
        case.case_type = CaseType::Data;
        case.endpoint = None;
        case.table = Some("T001".to_string());
        case.expected_key = Some(key);
        let mut empty = case.clone();
        empty.id = "t001w".to_string();
        empty.table = Some("T001W".to_string());
        empty.expected_key = None;
        empty.expected_count = Some(0);

        let result = TestingPlugin.execute(&job(vec![case, empty]), &adapter).await.unwrap();
        assert_eq!(result.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn data_expected_count_is_a_minimum() {
        let adapter = adapter().await;
        for bukrs in ["1000", "2000"] {
            let key = Record::from([("BUKRS".to_string(), json!(bukrs))]);
            adapter.set_table("T001", &key, &Record::new()).await.unwrap();
        }

        let mut enough = TestCase::api("at_least_one", "/unused", 200);
        enough.case_type = CaseType::Data;
        enough.endpoint = None;
        enough.table = Some("T001".to_string());
        enough.expected_count = Some(1);
        let mut too_many = enough.clone();
        too_many.id = "at_least_three".to_string();
        too_many.expected_count = Some(3);

        let result = TestingPlugin
            .execute(&job(vec![enough, too_many]), &adapter)
            .await
            .unwrap();
        let cases = &result.payload["cases"];
        assert_eq!(cases[0]["passed"], true);
        assert_eq!(cases[0]["message"], "T001: 2 row(s)");
        assert_eq!(cases[1]["passed"], false);
        assert_eq!(
            cases[1]["message"],
            "T001: expected at least 3 row(s), found 2"
        );
    }

    #[tokio::test]
    async fn named_process_supplies_default_steps() {
        let adapter = adapter().await;
        let mut p2p = TestCase::api("p2p", "/unused", 200);
        p2p.case_type = CaseType::Process;
        p2p.endpoint = None;
        p2p.process = Some("PROCURE_TO_PAY".to_string());
        let mut unnamed = p2p.clone();
        unnamed.id = "o2c".to_string();
        unnamed.process = None;

        let result = TestingPlugin
            .execute(&job(vec![p2p, unnamed]), &adapter)
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Succeeded);
        let cases = &result.payload["cases"];
        assert_eq!(cases[0]["process"], "PROCURE_TO_PAY");
        assert_eq!(cases[0]["steps"].as_array().unwrap().len(), 5);
        assert_eq!(cases[0]["steps"][2]["name"], "Goods Receipt");
        assert_eq!(cases[1]["process"], "ORDER_TO_CASH");
        assert_eq!(cases[1]["steps"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn unknown_process_gets_generic_steps() {
        let steps = default_process_steps("QUOTE_TO_ORDER");
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Initialize", "Execute", "Validate"]);
        assert_eq!(
            steps[0].endpoint.as_deref(),
            Some("/sap/process/quote_to_order/initialize")
        );
    }

    #[tokio::test]
    async fn integration_case_checks_connectivity() {
        let adapter = adapter().await;
        let mut case = TestCase::api("crm_link", "/unused", 200);
        case.case_type = CaseType::Integration;
        case.endpoint = None;
        case.target = Some("Salesforce".to_string());

        let result = TestingPlugin.execute(&job(vec![case.clone()]), &adapter).await.unwrap();
        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(
            result.payload["cases"][0]["message"],
            "SAP -> Salesforce: connectivity OK"
        );

        adapter.fail_next(AdapterError::Timeout { millis: 500 });
        let result = TestingPlugin.execute(&job(vec![case]), &adapter).await.unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.is_retryable());
    }

    #[tokio::test]
    async fn transient_adapter_error_keeps_job_retryable() {
        let adapter = adapter().await;
        let job = job(vec![
            TestCase::api("missing", "/nowhere", 200),
            TestCase::api("health", "/sap/health", 200),
        ]);
        adapter.fail_next(AdapterError::Unavailable("gateway down".to_string()));
        // First case consumes the injected error.
        let result = TestingPlugin.execute(&job, &adapter).await.unwrap();
        assert!(result.is_retryable());
        let error = result.error.unwrap();
        assert_eq!(error.step_index, Some(0));
        assert!(matches!(error.cause, FailureCause::Adapter { transient: true, .. }));
    }

    #[test]
    fn dry_run_checks_case_shape() {
        let mut bad = TestCase::api("bad", "/x", 200);
        bad.endpoint = None;
        let result = TestingPlugin.dry_run(&job(vec![TestCase::api("ok", "/sap/health", 200), bad]));
        assert!(result.dry_run);
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.records_failed, 1);
        assert_eq!(result.payload["cases"][0]["status"], "validated");
    }
}
