//! Job handlers.
//!
//! One [`Plugin`] per [`JobKind`], held in a closed [`PluginSet`]. Plugins
//! turn a job's payload into adapter calls and return a [`JobResult`];
//! adapter errors become failed results, never `Err`. `Err(PluginFault)` is
//! reserved for internal defects and is handled by the executor.

pub mod customizing;
pub mod migration;
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::Adapter;
use crate::domain::{Job, JobKind, JobResult, PluginFault};

pub use customizing::CustomizingPlugin;
pub use migration::MigrationPlugin;
pub use testing::TestingPlugin;

/// Capability handler for one job kind.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn kind(&self) -> JobKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Run the job against `adapter`.
    async fn execute(&self, job: &Job, adapter: &dyn Adapter) -> Result<JobResult, PluginFault>;

    /// Validate payload shape and target binding without touching any adapter.
    fn dry_run(&self, job: &Job) -> JobResult;
}

/// Exactly one plugin per job kind.
#[derive(Clone)]
pub struct PluginSet {
    customizing: Arc<dyn Plugin>,
    migration: Arc<dyn Plugin>,
    testing: Arc<dyn Plugin>,
}

impl PluginSet {
    /// The built-in customizing, migration and testing plugins.
    pub fn standard() -> Self {
        Self {
            customizing: Arc::new(CustomizingPlugin),
            migration: Arc::new(MigrationPlugin),
            testing: Arc::new(TestingPlugin),
        }
    }

    /// Replace the handler for `plugin.kind()`.
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        match plugin.kind() {
            JobKind::Customizing => self.customizing = plugin,
            JobKind::Migration => self.migration = plugin,
            JobKind::Testing => self.testing = plugin,
        }
        self
    }

    pub fn get(&self, kind: JobKind) -> &dyn Plugin {
        match kind {
            JobKind::Customizing => self.customizing.as_ref(),
            JobKind::Migration => self.migration.as_ref(),
            JobKind::Testing => self.testing.as_ref(),
        }
    }
}

impl Default for PluginSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Shape problems common to every dry run.
pub(crate) fn binding_problems(job: &Job, expected: JobKind) -> Vec<String> {
    let mut problems = Vec::new();
    if job.target_system.trim().is_empty() {
        problems.push("job is not bound to a target system".to_string());
    }
    if job.payload.kind() != expected {
        problems.push(format!(
            "payload is {} but plugin handles {}",
            job.payload.kind(),
            expected
        ));
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedTesting;

    #[async_trait]
    impl Plugin for NamedTesting {
        fn kind(&self) -> JobKind {
            JobKind::Testing
        }

        fn name(&self) -> &str {
            "named-testing"
        }

        async fn execute(&self, _job: &Job, _adapter: &dyn Adapter) -> Result<JobResult, PluginFault> {
            Err(PluginFault::Internal("unused".to_string()))
        }

        fn dry_run(&self, job: &Job) -> JobResult {
            JobResult::skipped(job, "unused")
        }
    }

    #[test]
    fn standard_set_dispatches_by_kind() {
        let set = PluginSet::standard();
        for kind in JobKind::ALL {
            assert_eq!(set.get(kind).kind(), kind);
            assert_eq!(set.get(kind).name(), kind.as_str());
        }
    }

    #[test]
    fn with_plugin_replaces_only_its_kind() {
        let set = PluginSet::standard().with_plugin(Arc::new(NamedTesting));
        assert_eq!(set.get(JobKind::Testing).name(), "named-testing");
        assert_eq!(set.get(JobKind::Migration).name(), "migration");
    }
}
