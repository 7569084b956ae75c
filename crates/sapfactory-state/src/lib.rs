//! sapfactory-state: evidence persistence for SAP Factory runs
//!
//! Every run writes its plan, one result artifact per job and a final summary
//! through the [`ArtifactSink`] trait. Two backends ship with the crate:
//!
//! - [`FsArtifactStore`]: one directory per run id under a configured root
//! - [`fakes::MemoryArtifactStore`]: in-memory, with injectable write failures

mod error;
pub mod fakes;
mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsArtifactStore;
pub use storage_traits::{
    artifact_path, sanitize_name, ArtifactCategory, ArtifactInfo, ArtifactSink, RunId,
    StorageResult, SUMMARY_FILE,
};
