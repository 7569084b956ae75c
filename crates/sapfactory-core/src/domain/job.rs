//! Jobs and plans.

use serde::{Deserialize, Serialize};

use crate::domain::model::{CustomizingPackage, MigrationObject, TestSuite};
use sapfactory_state::ArtifactCategory;

/// Category of work a job performs; also selects its plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Customizing,
    Migration,
    Testing,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Customizing, JobKind::Migration, JobKind::Testing];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Customizing => "customizing",
            JobKind::Migration => "migration",
            JobKind::Testing => "testing",
        }
    }

    /// Prefix of generated job ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            JobKind::Customizing => "cust",
            JobKind::Migration => "migr",
            JobKind::Testing => "test",
        }
    }

    /// Artifact sub-directory for results of this kind.
    pub fn category(&self) -> ArtifactCategory {
        match self {
            JobKind::Customizing => ArtifactCategory::Customizing,
            JobKind::Migration => ArtifactCategory::Migration,
            JobKind::Testing => ArtifactCategory::Testing,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain payload carried by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum JobPayload {
    Customizing(CustomizingPackage),
    Migration(MigrationObject),
    Testing(TestSuite),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Customizing(_) => JobKind::Customizing,
            JobPayload::Migration(_) => JobKind::Migration,
            JobPayload::Testing(_) => JobKind::Testing,
        }
    }
}

/// Atomic unit of work bound to one target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// `<prefix>_<sequence>_<declared id>`, unique within a plan.
    pub id: String,
    pub kind: JobKind,
    /// 1-based position in the plan.
    pub sequence: usize,
    pub target_system: String,
    pub label: String,
    pub estimated_manual_hours: f64,
    /// Minutes the automated job is expected to take.
    pub estimated_minutes: f64,
    pub payload: JobPayload,
}

/// Ordered job list for one run plus the identity of the model it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub project: String,
    pub customer: String,
    /// sha256 of the canonical JSON form of the model.
    pub model_digest: String,
    pub jobs: Vec<Job>,
    /// Sum of job minutes plus a 10% buffer, rounded down.
    pub estimated_duration_minutes: u64,
    /// Sum of job hours times the project-management overhead factor.
    pub estimated_manual_hours: f64,
}

impl Plan {
    pub fn total_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.id.as_str()).collect()
    }

    /// Job counts per kind, in kind order.
    pub fn kind_counts(&self) -> Vec<(JobKind, usize)> {
        JobKind::ALL
            .iter()
            .map(|k| (*k, self.jobs.iter().filter(|j| j.kind == *k).count()))
            .collect()
    }

    /// Distinct target systems in first-use order.
    pub fn target_systems(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for job in &self.jobs {
            if !out.contains(&job.target_system.as_str()) {
                out.push(&job.target_system);
            }
        }
        out
    }
}
