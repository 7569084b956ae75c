//! Planner: implementation model -> ordered job list.
//!
//! `build_plan` is pure: no I/O and no adapter calls. Jobs are ordered
//! customizing, then migration, then testing; within a kind, declaration
//! order. Identical models always yield identical plans.

use crate::config::EstimatePolicy;
use crate::domain::{
    compute_digest, ImplementationModel, Job, JobKind, JobPayload, MigrationObject, Plan,
    ValidationError,
};
use sapfactory_state::sanitize_name;

/// Validate the model and derive its plan.
pub fn build_plan(
    model: &ImplementationModel,
    policy: &EstimatePolicy,
) -> Result<Plan, ValidationError> {
    validate(model)?;

    let mut jobs: Vec<Job> = Vec::new();

    for pkg in &model.customizing.packages {
        let steps = pkg.steps.len() as f64;
        push_job(
            &mut jobs,
            JobKind::Customizing,
            &pkg.id,
            &pkg.target,
            steps * policy.hours_per_customizing_step,
            policy.base_minutes_customizing + steps / policy.steps_per_minute.max(1.0),
            JobPayload::Customizing(pkg.clone()),
        );
    }

    for obj in &model.migration.objects {
        let volume = migration_volume(obj) as f64;
        push_job(
            &mut jobs,
            JobKind::Migration,
            &obj.id,
            &obj.target,
            policy.hours_per_migration_object,
            policy.base_minutes_migration + volume / policy.records_per_minute.max(1.0),
            JobPayload::Migration(obj.clone()),
        );
    }

    for suite in &model.testing.suites {
        let cases = suite.cases.len() as f64;
        push_job(
            &mut jobs,
            JobKind::Testing,
            &suite.id,
            &suite.target,
            cases * policy.hours_per_test_case,
            policy.base_minutes_testing + cases / policy.cases_per_minute.max(1.0),
            JobPayload::Testing(suite.clone()),
        );
    }

    let minutes: f64 = jobs.iter().map(|j| j.estimated_minutes).sum();
    let hours: f64 = jobs.iter().map(|j| j.estimated_manual_hours).sum();
    let model_digest = compute_digest(&serde_json::to_value(model).unwrap_or_default());

    Ok(Plan {
        project: model.project.name.clone(),
        customer: model.project.customer.clone(),
        model_digest,
        jobs,
        estimated_duration_minutes: (minutes * policy.duration_buffer).floor() as u64,
        estimated_manual_hours: round1(hours * policy.overhead_factor),
    })
}

/// Check the model without building a plan.
pub fn validate(model: &ImplementationModel) -> Result<(), ValidationError> {
    let mut seen: Vec<&str> = Vec::new();
    for system in &model.landscape.systems {
        if seen.contains(&system.id.as_str()) {
            return Err(ValidationError::DuplicateSystem {
                system: system.id.clone(),
            });
        }
        seen.push(&system.id);
    }

    let check_target = |kind: JobKind, item: &str, target: &str| {
        if seen.contains(&target) {
            Ok(())
        } else {
            Err(ValidationError::UndeclaredTarget {
                kind,
                item: item.to_string(),
                system: target.to_string(),
            })
        }
    };

    for pkg in &model.customizing.packages {
        check_target(JobKind::Customizing, &pkg.id, &pkg.target)?;
    }
    for obj in &model.migration.objects {
        check_target(JobKind::Migration, &obj.id, &obj.target)?;
        if obj.mapping.is_empty() {
            return Err(ValidationError::EmptyMapping {
                object: obj.id.clone(),
            });
        }
        if obj.batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize {
                object: obj.id.clone(),
            });
        }
    }
    for suite in &model.testing.suites {
        check_target(JobKind::Testing, &suite.id, &suite.target)?;
        if suite.cases.is_empty() {
            return Err(ValidationError::EmptySuite {
                suite: suite.id.clone(),
            });
        }
    }
    Ok(())
}

fn push_job(
    jobs: &mut Vec<Job>,
    kind: JobKind,
    declared_id: &str,
    target: &str,
    hours: f64,
    minutes: f64,
    payload: JobPayload,
) {
    let sequence = jobs.len() + 1;
    let label = match kind {
        JobKind::Customizing => format!("Customizing: {declared_id}"),
        JobKind::Migration => format!("Migration: {declared_id}"),
        JobKind::Testing => format!("Testing: {declared_id}"),
    };
    jobs.push(Job {
        id: format!(
            "{}_{:03}_{}",
            kind.id_prefix(),
            sequence,
            sanitize_name(declared_id)
        ),
        kind,
        sequence,
        target_system: target.to_string(),
        label,
        estimated_manual_hours: hours,
        estimated_minutes: minutes,
        payload,
    });
}

/// Records a migration object is expected to move; falls back to one batch.
fn migration_volume(obj: &MigrationObject) -> usize {
    let declared = if obj.records.is_empty() {
        obj.generated.unwrap_or(0)
    } else {
        obj.records.len()
    };
    if declared > 0 {
        declared
    } else {
        obj.batch_size
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CustomizingPackage, CustomizingStep, LandscapeConfig, ProjectConfig, Record, SystemConfig,
        TestCase, TestSuite,
    };
    use std::collections::BTreeMap;

    fn model() -> ImplementationModel {
        let mut key = Record::new();
        key.insert("BUKRS".to_string(), "1000".into());
        ImplementationModel {
            project: ProjectConfig {
                name: "Rollout".to_string(),
                customer: "ACME".to_string(),
                template: "STANDARD".to_string(),
                version: "1.0.0".to_string(),
            },
            landscape: LandscapeConfig {
                systems: vec![SystemConfig {
                    id: "DEV".to_string(),
                    client: "100".to_string(),
                    description: None,
                }],
            },
            scope: Default::default(),
            customizing: crate::domain::CustomizingConfig {
                packages: vec![CustomizingPackage {
                    id: "FI BASE".to_string(),
                    target: "DEV".to_string(),
                    description: None,
                    steps: vec![
                        CustomizingStep::set_table("T001", key.clone(), Record::new()),
                        CustomizingStep::set_table("T001", key, Record::new()),
                    ],
                }],
            },
            migration: crate::domain::MigrationConfig {
                objects: vec![MigrationObject {
                    id: "MATERIAL".to_string(),
                    source: "csv".to_string(),
                    target: "DEV".to_string(),
                    entity: None,
                    mapping: BTreeMap::from([("MATNR".to_string(), "MATNR".to_string())]),
                    validation_rules: vec![],
                    batch_size: 1000,
                    records: vec![],
                    generated: Some(500),
                }],
            },
            testing: crate::domain::TestingConfig {
                suites: vec![TestSuite {
                    id: "SMOKE".to_string(),
                    target: "DEV".to_string(),
                    description: None,
                    cases: vec![TestCase::api("HEALTH", "/sap/health", 200)],
                }],
            },
        }
    }

    #[test]
    fn ids_are_prefixed_sequenced_and_sanitised() {
        let plan = build_plan(&model(), &EstimatePolicy::default()).unwrap();
        assert_eq!(
            plan.job_ids(),
            vec!["cust_001_FI_BASE", "migr_002_MATERIAL", "test_003_SMOKE"]
        );
        assert_eq!(plan.jobs[1].label, "Migration: MATERIAL");
    }

    #[test]
    fn estimates_follow_policy() {
        let plan = build_plan(&model(), &EstimatePolicy::default()).unwrap();
        // (2 steps * 2h + 4h + 1 case * 1h) * 1.2
        assert!((plan.estimated_manual_hours - 10.8).abs() < 1e-9);
        // (5 + 0.02) + (15 + 1.0) + (10 + 0.02) = 31.04 * 1.1 = 34.14
        assert_eq!(plan.estimated_duration_minutes, 34);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut m = model();
        m.migration.objects[0].batch_size = 0;
        assert!(matches!(
            build_plan(&m, &EstimatePolicy::default()),
            Err(ValidationError::ZeroBatchSize { .. })
        ));
    }

    #[test]
    fn duplicate_system_is_rejected() {
        let mut m = model();
        m.landscape.systems.push(m.landscape.systems[0].clone());
        assert!(matches!(
            validate(&m),
            Err(ValidationError::DuplicateSystem { .. })
        ));
    }
}
