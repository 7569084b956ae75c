//! Domain models for the SAP implementation factory.
//!
//! Canonical definitions for the core entities:
//! - `ImplementationModel`: declarative configuration a run starts from
//! - `Job` / `Plan`: ordered units of work derived from the model
//! - `JobResult`: outcome of one job
//! - `Run` / `RunSummary`: aggregate over one plan execution

pub mod digest;
pub mod error;
pub mod job;
pub mod model;
pub mod result;
pub mod run;

pub use digest::compute_digest;
pub use error::{FactoryError, PluginFault, Result, RunFault, ValidationError};
pub use job::{Job, JobKind, JobPayload, Plan};
pub use model::{
    CaseType, CompanyCode, CustomizingConfig, CustomizingPackage, CustomizingStep,
    ImplementationModel, LandscapeConfig, MigrationConfig, MigrationObject, OrgConfig, Plant,
    ProcessStep, ProjectConfig, Record, ScopeConfig, StepAction, SystemConfig, TestCase,
    TestSuite, TestingConfig,
};
pub use result::{FailureCause, JobError, JobResult, JobStatus};
pub use run::{
    cost_savings_percent, JobIndexEntry, JobState, ProgressHandle, Run, RunProgress, RunStatus,
    RunSummary,
};
