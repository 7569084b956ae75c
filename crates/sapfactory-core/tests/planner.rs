//! Planner contract tests: ordering, determinism and model validation.

use sapfactory_core::{
    build_plan, EstimatePolicy, ImplementationModel, JobKind, ValidationError,
};

const MODEL: &str = r#"
project:
  name: ACME S/4 Rollout
  customer: ACME
landscape:
  systems:
    - id: DEV
      client: "100"
    - id: QAS
      client: "200"
testing:
  suites:
    - id: SMOKE
      target: QAS
      cases:
        - id: health
          endpoint: /sap/health
          expected_status: 200
migration:
  objects:
    - id: BUSINESS_PARTNER
      mapping: { BP_ID: PARTNER }
      generated: 5
    - id: MATERIAL
      mapping: { MATNR: MATNR }
      generated: 5
customizing:
  packages:
    - id: FI BASE
      steps:
        - action: set_table
          table: T001
          key: { BUKRS: "1000" }
"#;

fn model() -> ImplementationModel {
    ImplementationModel::from_yaml(MODEL).unwrap()
}

#[test]
fn test_jobs_are_ordered_by_kind_then_declaration() {
    let plan = build_plan(&model(), &EstimatePolicy::default()).unwrap();

    let kinds: Vec<JobKind> = plan.jobs.iter().map(|j| j.kind).collect();
    assert_eq!(
        kinds,
        vec![
            JobKind::Customizing,
            JobKind::Migration,
            JobKind::Migration,
            JobKind::Testing
        ]
    );
    assert_eq!(
        plan.job_ids(),
        vec![
            "cust_001_FI_BASE",
            "migr_002_BUSINESS_PARTNER",
            "migr_003_MATERIAL",
            "test_004_SMOKE"
        ]
    );
    let sequences: Vec<usize> = plan.jobs.iter().map(|j| j.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert_eq!(plan.target_systems(), vec!["DEV", "QAS"]);
}

#[test]
fn test_identical_models_yield_identical_plans() {
    let policy = EstimatePolicy::default();
    let a = build_plan(&model(), &policy).unwrap();
    let b = build_plan(&model(), &policy).unwrap();

    assert_eq!(a, b);
    assert_eq!(a.model_digest.len(), 64);
}

#[test]
fn test_digest_tracks_model_content() {
    let policy = EstimatePolicy::default();
    let mut changed = model();
    changed.project.customer = "Globex".to_string();

    let a = build_plan(&model(), &policy).unwrap();
    let b = build_plan(&changed, &policy).unwrap();
    assert_ne!(a.model_digest, b.model_digest);
}

#[test]
fn test_empty_model_yields_empty_plan() {
    let model = ImplementationModel::from_yaml(
        "project: { name: Empty, customer: Nobody }\n",
    )
    .unwrap();
    let plan = build_plan(&model, &EstimatePolicy::default()).unwrap();
    assert_eq!(plan.total_jobs(), 0);
    assert_eq!(plan.estimated_manual_hours, 0.0);
}

#[test]
fn test_undeclared_target_is_rejected_before_any_job() {
    let mut model = model();
    model.testing.suites[0].target = "PRD".to_string();

    let err = build_plan(&model, &EstimatePolicy::default()).unwrap_err();
    assert_eq!(
        err,
        ValidationError::UndeclaredTarget {
            kind: JobKind::Testing,
            item: "SMOKE".to_string(),
            system: "PRD".to_string(),
        }
    );
}

#[test]
fn test_empty_mapping_and_empty_suite_are_rejected() {
    let mut no_mapping = model();
    no_mapping.migration.objects[1].mapping.clear();
    assert!(matches!(
        build_plan(&no_mapping, &EstimatePolicy::default()),
        Err(ValidationError::EmptyMapping { object }) if object == "MATERIAL"
    ));

    let mut no_cases = model();
    no_cases.testing.suites[0].cases.clear();
    assert!(matches!(
        build_plan(&no_cases, &EstimatePolicy::default()),
        Err(ValidationError::EmptySuite { suite }) if suite == "SMOKE"
    ));
}

#[test]
fn test_kind_counts_cover_every_kind() {
    let plan = build_plan(&model(), &EstimatePolicy::default()).unwrap();
    assert_eq!(
        plan.kind_counts(),
        vec![
            (JobKind::Customizing, 1),
            (JobKind::Migration, 2),
            (JobKind::Testing, 1)
        ]
    );
}
