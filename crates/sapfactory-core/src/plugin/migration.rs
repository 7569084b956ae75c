//! Migration: map source records, load them in batches, reconcile.
//!
//! Every run reports a reconciliation block. Records rejected by validation
//! rules or refused by the adapter count as missing; a loaded record whose
//! persisted form differs from the mapped source counts as mismatched. The
//! job succeeds only when every source record is matched.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{binding_problems, Plugin};
use crate::adapter::{schema, Adapter, AdapterError, RecordHandle};
use crate::domain::{
    Job, JobError, JobKind, JobPayload, JobResult, MigrationObject, PluginFault, Record,
};

pub struct MigrationPlugin;

// ---------------------------------------------------------------------------
// Validation rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Required(String),
    MaxLength(String, usize),
}

fn parse_rule(raw: &str) -> Result<Rule, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    match parts.as_slice() {
        ["required", field] if !field.is_empty() => Ok(Rule::Required(field.to_string())),
        ["max_length", field, n] if !field.is_empty() => n
            .parse()
            .map(|n| Rule::MaxLength(field.to_string(), n))
            .map_err(|_| format!("invalid length in rule '{raw}'")),
        _ => Err(format!("unknown validation rule '{raw}'")),
    }
}

fn parse_rules(raw: &[String]) -> Result<Vec<Rule>, String> {
    raw.iter().map(|r| parse_rule(r)).collect()
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First rule the record violates.
fn violation(rules: &[Rule], record: &Record) -> Option<String> {
    rules.iter().find_map(|rule| match rule {
        Rule::Required(field) => match record.get(field) {
            None | Some(Value::Null) => Some(format!("{field} is required")),
            Some(Value::String(s)) if s.trim().is_empty() => Some(format!("{field} is required")),
            _ => None,
        },
        Rule::MaxLength(field, max) => record
            .get(field)
            .map(text)
            .filter(|v| v.chars().count() > *max)
            .map(|v| format!("{field} exceeds {max} characters ({})", v.chars().count())),
    })
}

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

/// Keep only mapped fields, renamed to their targets.
fn apply_mapping(record: &Record, mapping: &BTreeMap<String, String>) -> Record {
    mapping
        .iter()
        .filter_map(|(source, target)| record.get(source).map(|v| (target.clone(), v.clone())))
        .collect()
}

fn pick<'a>(options: &[&'a str], i: usize) -> &'a str {
    options[i % options.len()]
}

/// Deterministic sample data for well-known migration objects.
pub fn generate_sample(object_id: &str, count: usize) -> Vec<Record> {
    (1..=count)
        .map(|i| {
            let value = match object_id {
                "BUSINESS_PARTNER" => json!({
                    "BP_ID": format!("BP{i:07}"),
                    "NAME": format!("Business Partner {i}"),
                    "TYPE": pick(&["1", "2"], i),
                    "COUNTRY": pick(&["DE", "AT", "CH"], i),
                    "CITY": format!("City {}", i % 50),
                    "POSTAL_CODE": format!("{}", 10000 + i),
                }),
                "CUSTOMER" => json!({
                    "KUNNR": format!("{i:010}"),
                    "NAME1": format!("Customer {i} GmbH"),
                    "LAND1": pick(&["DE", "AT", "CH", "FR", "IT"], i),
                    "ORT01": format!("City {}", i % 30),
                    "PSTLZ": format!("{}", 20000 + i),
                    "KTOKD": "0001",
                }),
                "VENDOR" => json!({
                    "LIFNR": format!("{i:010}"),
                    "NAME1": format!("Supplier {i} Ltd"),
                    "LAND1": pick(&["DE", "CN", "US", "IT"], i),
                    "ORT01": format!("Vendor City {}", i % 20),
                    "KTOKK": "0001",
                }),
                "MATERIAL" => json!({
                    "MATNR": format!("MAT{i:08}"),
                    "MAKTX": format!("Material Description {i}"),
                    "MTART": pick(&["ROH", "HALB", "FERT", "HAWA"], i),
                    "MEINS": "ST",
                    "MATKL": format!("0{}", (i % 9) + 1),
                }),
                "COST_CENTER" => json!({
                    "KOKRS": "1000",
                    "KOSTL": format!("{}", 1000 + i),
                    "KTEXT": format!("Cost Center {i}"),
                    "KOSAR": "H",
                    "VERAK": format!("Manager{}", i % 10),
                }),
                "GL_ACCOUNT" => json!({
                    "KTOPL": "YCOA",
                    "SAKNR": format!("{}", 100000 + i),
                    "TXT50": format!("GL Account {i}"),
                    "XBILK": pick(&["X", "S"], i),
                    "GVTYP": if i % 2 == 0 { "01" } else { "02" },
                }),
                _ => json!({
                    "ID": format!("REC{i:05}"),
                    "NAME": format!("Record {i}"),
                    "STATUS": "A",
                }),
            };
            serde_json::from_value(value).unwrap_or_default()
        })
        .collect()
}

fn source_records(obj: &MigrationObject) -> Vec<Record> {
    if obj.records.is_empty() {
        generate_sample(&obj.id, obj.generated.unwrap_or(0))
    } else {
        obj.records.clone()
    }
}

fn entity(obj: &MigrationObject) -> String {
    obj.entity
        .clone()
        .unwrap_or_else(|| schema::object_table(&obj.id).to_string())
}

fn object(job: &Job) -> Result<&MigrationObject, PluginFault> {
    match &job.payload {
        JobPayload::Migration(obj) => Ok(obj),
        _ => Err(PluginFault::PayloadMismatch {
            job_id: job.id.clone(),
            expected: JobKind::Migration,
        }),
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RecordIssue {
    index: usize,
    reason: String,
}

#[derive(Debug, Default, Serialize)]
struct Reconciliation {
    source_count: usize,
    loaded: usize,
    /// Distinct records the adapter holds after the load.
    target_count: usize,
    matched: usize,
    mismatched: usize,
    missing: usize,
    rejected: usize,
    match_rate_percent: f64,
    status: &'static str,
}

impl Reconciliation {
    fn finish(mut self) -> Self {
        self.match_rate_percent = if self.source_count == 0 {
            0.0
        } else {
            (self.matched as f64 / self.source_count as f64 * 10000.0).round() / 100.0
        };
        self.status = if self.matched == self.source_count {
            "RECONCILED"
        } else {
            "DISCREPANCY"
        };
        self
    }
}

/// Fields that differ between the mapped source and the persisted record.
fn differing_fields(expected: &Record, persisted: &Record) -> Vec<String> {
    expected
        .iter()
        .filter(|(k, v)| persisted.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}

#[async_trait]
impl Plugin for MigrationPlugin {
    fn kind(&self) -> JobKind {
        JobKind::Migration
    }

    async fn execute(&self, job: &Job, adapter: &dyn Adapter) -> Result<JobResult, PluginFault> {
        let obj = object(job)?;
        let started_at = Utc::now();

        let rules = match parse_rules(&obj.validation_rules) {
            Ok(rules) => rules,
            Err(problem) => {
                let payload = json!({"object": obj.id, "problems": [problem.clone()]});
                return Ok(JobResult::failed(
                    job,
                    started_at,
                    payload,
                    JobError::invalid_payload(problem),
                ));
            }
        };

        let entity = entity(obj);
        let source = source_records(obj);
        let batch_size = obj.batch_size.max(1);
        info!(
            job_id = %job.id,
            object = %obj.id,
            entity = %entity,
            records = source.len(),
            "migration started"
        );

        let mut rejected = Vec::new();
        let mut load_errors = Vec::new();
        let mut first_adapter_error: Option<AdapterError> = None;
        let mut loaded: Vec<(usize, Record, RecordHandle)> = Vec::new();

        for (batch_no, chunk) in source.chunks(batch_size).enumerate() {
            for (offset, record) in chunk.iter().enumerate() {
                let index = batch_no * batch_size + offset;
                let mapped = apply_mapping(record, &obj.mapping);
                if let Some(reason) = violation(&rules, &mapped) {
                    rejected.push(RecordIssue { index, reason });
                    continue;
                }
                match adapter.load_record(&entity, &mapped).await {
                    Ok(handle) => loaded.push((index, mapped, handle)),
                    Err(err) => {
                        load_errors.push(RecordIssue {
                            index,
                            reason: err.to_string(),
                        });
                        first_adapter_error.get_or_insert(err);
                    }
                }
            }
            debug!(job_id = %job.id, batch = batch_no + 1, size = chunk.len(), "migration batch loaded");
        }

        let mut recon = Reconciliation {
            source_count: source.len(),
            loaded: loaded.len(),
            rejected: rejected.len(),
            missing: rejected.len() + load_errors.len(),
            ..Default::default()
        };
        let mut mismatches = Vec::new();
        let mut handles = BTreeSet::new();

        for (index, mapped, handle) in &loaded {
            match adapter.read_record(&entity, handle).await {
                Ok(persisted) => {
                    handles.insert(handle.clone());
                    let diff = differing_fields(mapped, &persisted);
                    if diff.is_empty() {
                        recon.matched += 1;
                    } else {
                        recon.mismatched += 1;
                        mismatches.push(json!({"index": index, "handle": handle, "fields": diff}));
                    }
                }
                Err(err) => {
                    recon.missing += 1;
                    load_errors.push(RecordIssue {
                        index: *index,
                        reason: err.to_string(),
                    });
                    first_adapter_error.get_or_insert(err);
                }
            }
        }
        recon.target_count = handles.len();
        let recon = recon.finish();

        let error = if recon.matched == recon.source_count {
            None
        } else if let Some(err) = &first_adapter_error {
            Some(JobError::adapter(err))
        } else {
            Some(JobError::reconciliation(format!(
                "{} of {} records reconciled ({} mismatched, {} missing)",
                recon.matched, recon.source_count, recon.mismatched, recon.missing
            )))
        };

        info!(
            job_id = %job.id,
            matched = recon.matched,
            mismatched = recon.mismatched,
            missing = recon.missing,
            "migration reconciled"
        );

        let source_count = recon.source_count as u64;
        let matched = recon.matched as u64;
        let payload = json!({
            "object": obj.id,
            "source": obj.source,
            "entity": entity,
            "batch_size": batch_size,
            "batches": source.len().div_ceil(batch_size),
            "reconciliation": recon,
            "rejected_records": rejected,
            "load_errors": load_errors,
            "mismatches": mismatches,
        });
        Ok(JobResult::from_outcome(job, started_at, payload, error).with_records(
            source_count,
            matched,
            source_count - matched,
        ))
    }

    fn dry_run(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        let mut problems = binding_problems(job, JobKind::Migration);
        let mut payload = json!({"problems": []});

        if let JobPayload::Migration(obj) = &job.payload {
            if obj.mapping.is_empty() {
                problems.push("mapping is empty".to_string());
            }
            if obj.batch_size == 0 {
                problems.push("batch_size must be positive".to_string());
            }
            let rules = match parse_rules(&obj.validation_rules) {
                Ok(rules) => rules,
                Err(problem) => {
                    problems.push(problem);
                    Vec::new()
                }
            };

            let entity = entity(obj);
            let source = source_records(obj);
            let mapped: Vec<Record> = source
                .iter()
                .map(|r| apply_mapping(r, &obj.mapping))
                .collect();
            let would_reject = mapped
                .iter()
                .filter(|r| violation(&rules, r).is_some())
                .count();
            let missing_key = match schema::key_fields(&entity) {
                Some(fields) => mapped
                    .iter()
                    .filter(|r| fields.iter().any(|f| !r.contains_key(*f)))
                    .count(),
                None => 0,
            };
            payload = json!({
                "object": obj.id,
                "entity": entity,
                "source_count": source.len(),
                "batches": source.len().div_ceil(obj.batch_size.max(1)),
                "would_reject": would_reject,
                "missing_key_fields": missing_key,
            });
        }

        payload["problems"] = json!(problems);
        let source_count = payload["source_count"].as_u64().unwrap_or(0);
        let error = (!problems.is_empty()).then(|| JobError::invalid_payload(problems.join("; ")));
        JobResult::from_outcome(job, started_at, payload, error)
            .with_records(source_count, 0, 0)
            .as_dry_run()
    }
}
