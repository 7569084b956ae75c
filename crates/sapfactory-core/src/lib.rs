//! SAP Factory core library.
//!
//! Turns a declarative [`ImplementationModel`] into an ordered [`Plan`],
//! executes it through capability [`Plugin`]s against target-system
//! [`Adapter`]s, and records per-job artifacts plus a KPI summary through an
//! [`sapfactory_state::ArtifactSink`].

pub mod adapter;
pub mod config;
pub mod domain;
pub mod executor;
pub mod metrics;
pub mod obs;
pub mod planner;
pub mod plugin;
pub mod registry;
pub mod telemetry;

pub use adapter::{
    Adapter, AdapterError, AdapterFactory, AdapterRegistry, AdapterResult, AdapterState,
    ApiResponse, BapiResponse, FakeAdapterFactory, FakeSapAdapter, RecordHandle, TableWrite,
};
pub use config::{EstimatePolicy, FactoryConfig, FailurePolicy, LogConfig, RetryPolicy};
pub use domain::{
    FactoryError, ImplementationModel, Job, JobError, JobKind, JobPayload, JobResult, JobStatus,
    Plan, PluginFault, ProgressHandle, Result, Run, RunFault, RunProgress, RunStatus, RunSummary,
    ValidationError,
};
pub use executor::{Executor, FactoryContext};
pub use planner::{build_plan, validate};
pub use plugin::{CustomizingPlugin, MigrationPlugin, Plugin, PluginSet, TestingPlugin};
pub use registry::{RunRegistry, RunView};

pub use sapfactory_state::{ArtifactCategory, ArtifactInfo, ArtifactSink, FsArtifactStore, RunId};
