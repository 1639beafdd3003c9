//! Repository trait for project index persistence
//!
//! The index file stands in for a database. The trait lets the lifecycle
//! manager run against an in-memory fake in tests and against atomic file
//! writes in production.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

use super::types::ProjectInfo;

/// Read / write access to `project.inf` documents
#[async_trait]
pub trait IndexRepository: Send + Sync {
    /// Whether an index exists at `path` (the authoritative "project exists" signal)
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read and parse the whole index
    async fn read_index(&self, path: &Path) -> Result<ProjectInfo>;

    /// Serialize and replace the whole index in one step
    async fn write_index(&self, path: &Path, info: &ProjectInfo) -> Result<()>;

    /// Remove the index; a missing index is not an error
    async fn remove_index(&self, path: &Path) -> Result<()>;
}
