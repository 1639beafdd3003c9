//! Project lifecycle manager
//!
//! Owns every mutation of the project tree. Each index change is a single
//! locked read-modify-write:
//!
//! ```text
//! lock(key) -> read project.inf -> mutate -> write project.inf -> unlock(key)
//! ```
//!
//! The lock is released whether or not the mutation succeeded. Slow archive
//! work never runs while the lock is held.

use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::locking::LockClient;
use crate::error::{Error, Result};

use super::archive::{
    ArchiveTool, TarZipArchiver, compress_bundle, decompress_bundle, extract_bundle_root,
    remove_bundle_dir,
};
use super::repository::JsonIndexRepository;
use super::repository_trait::IndexRepository;
use super::files::{self, FileInfo, FileNode, ReadFilter};
use super::stats::{CommandStatsConverter, CounterSet, StatsConverter};
use super::tree::ResourceTree;
use super::types::{
    ArchiveType, BundleInfo, PROJECT_INDEX_FILE, ProjectInfo, ProjectStatus, StatsInfo,
};

/// Converter program used when none is configured
pub const DEFAULT_STATS_PROGRAM: &str = "logvault-stats";

/// Outcome of the archive work that follows a status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub status: ProjectStatus,
    /// Bundles whose archive operation succeeded
    pub succeeded: Vec<u64>,
    /// Bundles whose archive operation failed
    pub failed: Vec<u64>,
    /// False when the project status changed again before `available` was updated
    pub applied: bool,
}

/// Background part of `update_project_status`.
///
/// Dropping the handle lets the work finish on its own.
#[derive(Debug)]
pub struct StatusTransition {
    status: ProjectStatus,
    handle: JoinHandle<Result<TransitionReport>>,
}

impl StatusTransition {
    /// The status that was written to the index
    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the archive work and the `available` update
    pub async fn wait(self) -> Result<TransitionReport> {
        self.handle
            .await
            .map_err(|e| Error::Other(format!("status transition task failed: {}", e)))?
    }
}

#[derive(Clone)]
pub struct ProjectManager {
    tree: ResourceTree,
    index: Arc<dyn IndexRepository>,
    archiver: Arc<dyn ArchiveTool>,
    converter: Arc<dyn StatsConverter>,
    lock: LockClient,
}

impl std::fmt::Debug for ProjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectManager")
            .field("root", &self.tree.root())
            .field("identity", &self.lock.identity())
            .finish()
    }
}

impl ProjectManager {
    /// Manager over `tree` with the on-disk index, tar/zip archives and the
    /// default converter program
    pub fn new(tree: ResourceTree, lock: LockClient) -> Self {
        Self {
            tree,
            index: Arc::new(JsonIndexRepository::new()),
            archiver: Arc::new(TarZipArchiver::new()),
            converter: Arc::new(CommandStatsConverter::new(DEFAULT_STATS_PROGRAM, Vec::new())),
            lock,
        }
    }

    pub fn with_index_repository(mut self, index: Arc<dyn IndexRepository>) -> Self {
        self.index = index;
        self
    }

    pub fn with_archive_tool(mut self, archiver: Arc<dyn ArchiveTool>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn with_stats_converter(mut self, converter: Arc<dyn StatsConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn lock_client(&self) -> &LockClient {
        &self.lock
    }

    // ========== Helpers ==========

    async fn mutate_index<T, F>(&self, user: &str, domain: &str, project: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectInfo) -> Result<T> + Send,
        T: Send,
    {
        let key = ResourceTree::lock_key(user, domain, project);
        let path = self.tree.index_path(user, domain, project);

        self.lock.lock(&key).await?;
        let result = self.read_modify_write(&path, mutate).await;

        if let Err(e) = self.lock.unlock(&key).await {
            warn!(lock_key = %key, error = %e, "Failed to release index lock");
        }

        result
    }

    async fn read_modify_write<T, F>(&self, path: &Path, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut ProjectInfo) -> Result<T> + Send,
        T: Send,
    {
        let mut info = self.index.read_index(path).await?;
        let out = mutate(&mut info)?;
        self.index.write_index(path, &info).await?;
        Ok(out)
    }

    fn check_names(&self, domain: &str, project: &str) -> Result<()> {
        self.tree.validate_domain(domain)?;
        ResourceTree::validate_project_name(project)
    }

    /// Lock-free read of an existing project's index
    async fn read_project(&self, user: &str, domain: &str, project: &str) -> Result<ProjectInfo> {
        self.check_names(domain, project)?;
        let path = self.tree.index_path(user, domain, project);
        if !self.index.exists(&path).await? {
            return Err(Error::ProjectNotFound(project.to_string()));
        }
        self.index.read_index(&path).await
    }

    /// Path of a file uploaded into the project directory
    async fn upload_path(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        file_name: &str,
    ) -> Result<PathBuf> {
        if !ResourceTree::is_safe_entry_name(file_name) {
            return Err(Error::UploadNotFound(file_name.to_string()));
        }
        let path = self.tree.project_file(user, domain, project, file_name);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::UploadNotFound(file_name.to_string()));
        }
        Ok(path)
    }

    // ========== Domains ==========

    /// Create the domain directory; succeeds if it already exists
    pub async fn create_domain(&self, user: &str, domain: &str) -> Result<()> {
        self.tree.validate_domain(domain)?;
        let dir = self.tree.domain_dir(user, domain);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(path = %dir.display(), "Domain ready");
        Ok(())
    }

    // ========== Projects ==========

    /// Create a project; fails iff its `project.inf` already exists
    pub async fn create_project(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        description: &str,
    ) -> Result<()> {
        self.check_names(domain, project)?;

        let domain_dir = self.tree.domain_dir(user, domain);
        if !tokio::fs::try_exists(&domain_dir).await? {
            return Err(Error::DomainNotFound(domain.to_string()));
        }

        let path = self.tree.index_path(user, domain, project);
        if self.index.exists(&path).await? {
            return Err(Error::ProjectExists(project.to_string()));
        }

        tokio::fs::create_dir_all(self.tree.project_dir(user, domain, project)).await?;

        let key = ResourceTree::lock_key(user, domain, project);
        self.lock.lock(&key).await?;
        let result = async {
            if self.index.exists(&path).await? {
                return Err(Error::ProjectExists(project.to_string()));
            }
            self.index
                .write_index(&path, &ProjectInfo::new(project, description))
                .await
        }
        .await;
        if let Err(e) = self.lock.unlock(&key).await {
            warn!(lock_key = %key, error = %e, "Failed to release index lock");
        }
        result?;

        info!(domain = %domain, project = %project, "Project created");
        Ok(())
    }

    pub async fn project_info(&self, user: &str, domain: &str, project: &str) -> Result<ProjectInfo> {
        self.read_project(user, domain, project).await
    }

    /// All projects of a domain, sorted by name; unreadable indexes are skipped
    pub async fn list_projects(&self, user: &str, domain: &str) -> Result<Vec<ProjectInfo>> {
        self.tree.validate_domain(domain)?;
        let dir = self.tree.domain_dir(user, domain);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(Error::DomainNotFound(domain.to_string()));
        }

        let mut projects = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let index = entry.path().join(PROJECT_INDEX_FILE);
            if !self.index.exists(&index).await? {
                continue;
            }
            match self.index.read_index(&index).await {
                Ok(info) => projects.push(info),
                Err(e) => warn!(path = %index.display(), error = %e, "Skipping unreadable index"),
            }
        }

        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    pub async fn update_project_description(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        description: &str,
    ) -> Result<()> {
        self.read_project(user, domain, project).await?;
        let description = description.to_string();
        self.mutate_index(user, domain, project, move |info| {
            info.description = description;
            Ok(())
        })
        .await
    }

    /// Change the project status and start the archive work for its bundles.
    ///
    /// The status is written under the lock; compression or decompression
    /// runs afterwards in a background task, one operation per bundle, and a
    /// second locked write records which bundles are available.
    pub async fn update_project_status(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        status: &str,
    ) -> Result<StatusTransition> {
        let status =
            ProjectStatus::parse(status).ok_or_else(|| Error::InvalidStatus(status.to_string()))?;
        self.read_project(user, domain, project).await?;

        let name = project.to_string();
        let bundles = self
            .mutate_index(user, domain, project, move |info| {
                if info.status == status {
                    return Err(Error::StatusUnchanged {
                        project: name,
                        status: status.to_string(),
                    });
                }
                info.set_status(status);
                Ok(info.bundles.clone())
            })
            .await?;

        info!(domain = %domain, project = %project, status = %status, bundles = bundles.len(), "Project status changed");

        let manager = self.clone();
        let (user, domain, project) = (user.to_string(), domain.to_string(), project.to_string());
        let handle = tokio::spawn(async move {
            manager
                .run_transition(&user, &domain, &project, status, bundles)
                .await
        });

        Ok(StatusTransition { status, handle })
    }

    async fn run_transition(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        status: ProjectStatus,
        bundles: Vec<BundleInfo>,
    ) -> Result<TransitionReport> {
        let project_dir = self.tree.project_dir(user, domain, project);
        let archiver = self.archiver.as_ref();

        let outcomes = join_all(bundles.iter().map(|bundle| {
            let project_dir = &project_dir;
            async move {
                let result = match status {
                    ProjectStatus::Open => decompress_bundle(archiver, project_dir, bundle).await,
                    ProjectStatus::Close => compress_bundle(archiver, project_dir, bundle).await,
                };
                if let Err(e) = &result {
                    error!(bundle = %bundle.name, status = %status, error = %e, "Bundle archive operation failed");
                }
                (bundle.id, result.is_ok())
            }
        }))
        .await;

        let succeeded: Vec<u64> = outcomes.iter().filter(|(_, ok)| *ok).map(|(id, _)| *id).collect();
        let failed: Vec<u64> = outcomes.iter().filter(|(_, ok)| !*ok).map(|(id, _)| *id).collect();

        let applied = self
            .mutate_index(user, domain, project, move |info| {
                if info.status != status {
                    return Ok(false);
                }
                for (id, ok) in outcomes {
                    if let Some(bundle) = info.bundle_mut(id) {
                        // open: available on success; close: still available on failure
                        bundle.available = ok == (status == ProjectStatus::Open);
                    }
                }
                Ok(true)
            })
            .await?;

        if applied {
            info!(project = %project, status = %status, failed = failed.len(), "Bundle availability updated");
        } else {
            warn!(project = %project, status = %status, "Status changed again, availability left untouched");
        }

        Ok(TransitionReport {
            status,
            succeeded,
            failed,
            applied,
        })
    }

    /// Delete the project directory with everything in it
    pub async fn delete_project(&self, user: &str, domain: &str, project: &str) -> Result<()> {
        self.read_project(user, domain, project).await?;

        let key = ResourceTree::lock_key(user, domain, project);
        let dir = self.tree.project_dir(user, domain, project);

        self.lock.lock(&key).await?;
        let result = tokio::fs::remove_dir_all(&dir).await;
        let removed = self.index.remove_index(&dir.join(PROJECT_INDEX_FILE)).await;
        if let Err(e) = self.lock.unlock(&key).await {
            warn!(lock_key = %key, error = %e, "Failed to release index lock");
        }
        result?;
        removed?;

        info!(domain = %domain, project = %project, "Project deleted");
        Ok(())
    }

    /// Entries of the project directory that no index entry accounts for
    pub async fn find_orphans(&self, user: &str, domain: &str, project: &str) -> Result<Vec<String>> {
        let info = self.read_project(user, domain, project).await?;

        let mut known = vec![PROJECT_INDEX_FILE.to_string()];
        for bundle in &info.bundles {
            known.push(bundle.name.clone());
            known.push(bundle.archive_file_name());
        }
        for stats in &info.stats {
            known.push(stats.file_name());
        }

        let mut orphans = Vec::new();
        let mut entries = tokio::fs::read_dir(self.tree.project_dir(user, domain, project)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !known.contains(&name) {
                orphans.push(name);
            }
        }

        orphans.sort();
        Ok(orphans)
    }

    // ========== Bundles ==========

    /// Register an archive already uploaded into the project directory.
    ///
    /// The archive's root entry names the bundle. Unless `preserve` is set
    /// the upload is removed once the bundle is recorded; with `preserve` it
    /// is kept as `<name><type>`.
    pub async fn register_bundle(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        archive_file_name: &str,
        description: &str,
        preserve: bool,
    ) -> Result<BundleInfo> {
        self.read_project(user, domain, project).await?;

        let kind = ArchiveType::from_file_name(archive_file_name)
            .ok_or_else(|| Error::UnsupportedArchive(archive_file_name.to_string()))?;
        let upload = self.upload_path(user, domain, project, archive_file_name).await?;

        let name = self.archiver.peek_root(&upload, kind).await?;
        if !ResourceTree::is_safe_entry_name(&name) {
            return Err(Error::Archive(format!(
                "{} has an unusable root entry: {}",
                archive_file_name, name
            )));
        }

        if self.read_project(user, domain, project).await?.has_bundle_named(&name) {
            return Err(Error::BundleExists(name));
        }

        let project_dir = self.tree.project_dir(user, domain, project);
        if tokio::fs::try_exists(project_dir.join(&name)).await? {
            // complete, left over from an attempt whose index write failed
            debug!(bundle = %name, "Bundle directory already extracted");
        } else {
            extract_bundle_root(self.archiver.as_ref(), &upload, kind, &project_dir, &name).await?;
        }

        let bundle_name = name.clone();
        let description = description.to_string();
        let bundle = self
            .mutate_index(user, domain, project, move |info| {
                if info.has_bundle_named(&bundle_name) {
                    return Err(Error::BundleExists(bundle_name));
                }
                let bundle = BundleInfo {
                    id: info.next_id(),
                    name: bundle_name,
                    description,
                    kind,
                    date: chrono::Utc::now(),
                    available: true,
                    preserved: preserve,
                };
                info.bundles.push(bundle.clone());
                Ok(bundle)
            })
            .await?;

        let archive = project_dir.join(bundle.archive_file_name());
        let cleanup = if !preserve {
            tokio::fs::remove_file(&upload).await
        } else if upload != archive {
            tokio::fs::rename(&upload, &archive).await
        } else {
            Ok(())
        };
        if let Err(e) = cleanup {
            warn!(upload = %upload.display(), error = %e, "Bundle registered but its upload was not cleaned up");
        }

        info!(project = %project, bundle = %bundle.name, id = bundle.id, "Bundle registered");
        Ok(bundle)
    }

    pub async fn bundle_info(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
    ) -> Result<BundleInfo> {
        self.read_project(user, domain, project)
            .await?
            .bundle(bundle_id)
            .cloned()
            .ok_or(Error::BundleNotFound(bundle_id))
    }

    pub async fn list_bundles(&self, user: &str, domain: &str, project: &str) -> Result<Vec<BundleInfo>> {
        Ok(self.read_project(user, domain, project).await?.bundles)
    }

    pub async fn update_bundle_description(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
        description: &str,
    ) -> Result<()> {
        self.read_project(user, domain, project).await?;
        let description = description.to_string();
        self.mutate_index(user, domain, project, move |info| {
            let bundle = info
                .bundle_mut(bundle_id)
                .ok_or(Error::BundleNotFound(bundle_id))?;
            bundle.description = description;
            Ok(())
        })
        .await
    }

    /// Remove a bundle's directory and archive, then its index entry
    pub async fn delete_bundle(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
    ) -> Result<()> {
        let bundle = self.bundle_info(user, domain, project, bundle_id).await?;
        let project_dir = self.tree.project_dir(user, domain, project);

        let dir = project_dir.join(&bundle.name);
        if tokio::fs::try_exists(&dir).await? {
            remove_bundle_dir(&dir).await?;
        }
        remove_file_if_exists(&project_dir.join(bundle.archive_file_name())).await?;

        self.mutate_index(user, domain, project, move |info| {
            info.bundles.retain(|b| b.id != bundle_id);
            Ok(())
        })
        .await?;

        info!(project = %project, bundle = %bundle.name, id = bundle_id, "Bundle deleted");
        Ok(())
    }

    // ========== Bundle files ==========

    /// Directory of a bundle that is currently extracted
    async fn open_bundle_dir(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
    ) -> Result<PathBuf> {
        let bundle = self.bundle_info(user, domain, project, bundle_id).await?;
        let dir = self.tree.project_dir(user, domain, project).join(&bundle.name);
        if !bundle.available || !tokio::fs::try_exists(&dir).await? {
            return Err(Error::BundleUnavailable(bundle_id));
        }
        Ok(dir)
    }

    /// File tree of a bundle; with `search`, only files containing it are listed
    pub async fn list_bundle_files(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
        search: Option<&str>,
    ) -> Result<FileNode> {
        let dir = self.open_bundle_dir(user, domain, project, bundle_id).await?;
        files::list_tree(&dir, search).await
    }

    pub async fn bundle_file_info(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
        file: &str,
    ) -> Result<FileInfo> {
        let dir = self.open_bundle_dir(user, domain, project, bundle_id).await?;
        files::file_info(&dir, file).await
    }

    /// Content of one bundle file, restricted by `filter`
    pub async fn read_bundle_file(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        bundle_id: u64,
        file: &str,
        filter: &ReadFilter,
    ) -> Result<String> {
        let dir = self.open_bundle_dir(user, domain, project, bundle_id).await?;
        debug!(project = %project, bundle_id, file = %file, "Reading bundle file");
        files::read_filtered(&dir, file, filter).await
    }

    // ========== Stats ==========

    /// Convert an uploaded CSV into a stats dataset and register it
    pub async fn register_stats(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        csv_file_name: &str,
        description: &str,
    ) -> Result<StatsInfo> {
        self.read_project(user, domain, project).await?;
        let upload = self.upload_path(user, domain, project, csv_file_name).await?;

        let target = self.converter.peek_name(&upload).await?;
        if !ResourceTree::is_safe_entry_name(&target.file_name()) {
            return Err(Error::StatsConversion(format!(
                "unusable dataset name: {}",
                target.file_name()
            )));
        }
        if self.read_project(user, domain, project).await?.has_stats_named(&target.name) {
            return Err(Error::StatsExists(target.name));
        }

        let converted = match self.converter.convert(&upload).await {
            Ok(converted) => converted,
            Err(e) => {
                remove_file_if_exists(&upload).await?;
                return Err(e);
            }
        };

        let description = description.to_string();
        let stats_name = converted.name.clone();
        let stats = self
            .mutate_index(user, domain, project, move |info| {
                if info.has_stats_named(&stats_name) {
                    return Err(Error::StatsExists(stats_name));
                }
                let stats = StatsInfo {
                    id: info.next_id(),
                    name: stats_name,
                    description,
                    kind: converted.kind,
                    available: true,
                };
                info.stats.push(stats.clone());
                Ok(stats)
            })
            .await?;

        if stats.file_name() != csv_file_name {
            remove_file_if_exists(&upload).await?;
        }

        info!(project = %project, stats = %stats.name, id = stats.id, "Stats registered");
        Ok(stats)
    }

    pub async fn stats_info(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        stats_id: u64,
    ) -> Result<StatsInfo> {
        self.read_project(user, domain, project)
            .await?
            .stats_entry(stats_id)
            .cloned()
            .ok_or(Error::StatsNotFound(stats_id))
    }

    pub async fn list_stats(&self, user: &str, domain: &str, project: &str) -> Result<Vec<StatsInfo>> {
        Ok(self.read_project(user, domain, project).await?.stats)
    }

    pub async fn update_stats_description(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        stats_id: u64,
        description: &str,
    ) -> Result<()> {
        self.read_project(user, domain, project).await?;
        let description = description.to_string();
        self.mutate_index(user, domain, project, move |info| {
            let stats = info
                .stats_entry_mut(stats_id)
                .ok_or(Error::StatsNotFound(stats_id))?;
            stats.description = description;
            Ok(())
        })
        .await
    }

    async fn dataset_path(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        stats_id: u64,
    ) -> Result<PathBuf> {
        let stats = self.stats_info(user, domain, project, stats_id).await?;
        Ok(self
            .tree
            .project_file(user, domain, project, &stats.file_name()))
    }

    /// Counter names of a dataset, narrowed by `set`
    pub async fn stats_counters(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        stats_id: u64,
        set: CounterSet,
    ) -> Result<Vec<String>> {
        let dataset = self.dataset_path(user, domain, project, stats_id).await?;
        self.converter.counters(&dataset, set).await
    }

    /// Series of the selected counters, as produced by the converter
    pub async fn stats_data(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        stats_id: u64,
        counters: &[String],
    ) -> Result<serde_json::Value> {
        let dataset = self.dataset_path(user, domain, project, stats_id).await?;
        self.converter.data(&dataset, counters).await
    }

    /// Remove a dataset file, then its index entry
    pub async fn delete_stats(
        &self,
        user: &str,
        domain: &str,
        project: &str,
        stats_id: u64,
    ) -> Result<()> {
        let stats = self.stats_info(user, domain, project, stats_id).await?;
        remove_file_if_exists(&self.tree.project_file(user, domain, project, &stats.file_name()))
            .await?;

        self.mutate_index(user, domain, project, move |info| {
            info.stats.retain(|s| s.id != stats_id);
            Ok(())
        })
        .await?;

        info!(project = %project, stats = %stats.name, id = stats_id, "Stats deleted");
        Ok(())
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::{LockConfig, LockError, LockManager};
    use crate::domain::project::repository::MemoryIndexRepository;
    use crate::domain::project::stats::ConvertedStats;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    const USER: &str = "alice";
    const DOMAIN: &str = "team";

    /// Writes `<stem>.db` next to the upload
    struct FakeConverter;

    fn dataset_for(upload: &Path) -> ConvertedStats {
        let stem = upload.file_stem().unwrap().to_string_lossy().into_owned();
        ConvertedStats {
            name: stem,
            kind: ".db".to_string(),
        }
    }

    #[async_trait]
    impl StatsConverter for FakeConverter {
        async fn peek_name(&self, upload: &Path) -> Result<ConvertedStats> {
            Ok(dataset_for(upload))
        }

        async fn convert(&self, upload: &Path) -> Result<ConvertedStats> {
            let stats = dataset_for(upload);
            if std::fs::read_to_string(upload).unwrap().starts_with("bad") {
                return Err(Error::StatsConversion("bad input".to_string()));
            }
            std::fs::copy(upload, upload.with_file_name(stats.file_name())).unwrap();
            Ok(stats)
        }

        async fn counters(&self, dataset: &Path, set: CounterSet) -> Result<Vec<String>> {
            assert!(dataset.is_file());
            Ok(match set {
                CounterSet::All => vec!["cpu".to_string(), "mem".to_string()],
                CounterSet::Nonzero => vec!["cpu".to_string()],
                CounterSet::Vitality => vec!["mem".to_string()],
            })
        }

        async fn data(&self, dataset: &Path, counters: &[String]) -> Result<serde_json::Value> {
            assert!(dataset.is_file());
            Ok(serde_json::json!({ "counters": counters }))
        }
    }

    struct Fixture {
        temp: TempDir,
        locks: LockManager,
        manager: ProjectManager,
    }

    impl Fixture {
        fn project_dir(&self, project: &str) -> PathBuf {
            self.temp.path().join(DOMAIN).join(project)
        }

        /// Pack a bundle directory named `root` into `<project>/<upload>`
        async fn upload_bundle(&self, project: &str, root: &str, upload: &str) {
            let staging = self.temp.path().join("staging").join(root);
            std::fs::create_dir_all(staging.join("var/log")).unwrap();
            std::fs::write(staging.join("var/log/syslog.log"), format!("{} log\n", root)).unwrap();

            let kind = ArchiveType::from_file_name(upload).unwrap();
            TarZipArchiver::new()
                .compress(&staging, kind, &self.project_dir(project).join(upload))
                .await
                .unwrap();
        }
    }

    fn fixture_with(index: Arc<dyn IndexRepository>, max_attempts: u32) -> Fixture {
        let temp = TempDir::new().unwrap();
        let tree = ResourceTree::new(
            temp.path(),
            vec!["private".to_string(), DOMAIN.to_string()],
        );
        let locks = LockManager::new(
            LockConfig::default()
                .with_max_attempts(max_attempts)
                .with_retry_interval(Duration::from_millis(10)),
        );
        let manager = ProjectManager::new(
            tree,
            LockClient::coordinator_with_identity("test", locks.clone()),
        )
        .with_index_repository(index)
        .with_stats_converter(Arc::new(FakeConverter));

        Fixture {
            temp,
            locks,
            manager,
        }
    }

    async fn fixture() -> Fixture {
        let f = fixture_with(Arc::new(JsonIndexRepository::new()), 200);
        f.manager.create_domain(USER, DOMAIN).await.unwrap();
        f.manager.create_project(USER, DOMAIN, "p1", "first").await.unwrap();
        f
    }

    #[tokio::test]
    async fn test_create_project_and_duplicate() {
        let f = fixture().await;

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.name, "p1");
        assert_eq!(info.status, ProjectStatus::Open);
        assert_eq!(info.description, "first");
        assert!(f.project_dir("p1").join("project.inf").is_file());

        let err = f.manager.create_project(USER, DOMAIN, "p1", "").await.unwrap_err();
        assert!(matches!(err, Error::ProjectExists(_)));
        assert!(err.is_external());
        assert!(f.locks.list_active_locks().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_project_validation() {
        let f = fixture().await;

        assert!(matches!(
            f.manager.create_project(USER, DOMAIN, "bad name", "").await,
            Err(Error::InvalidProjectName(_))
        ));
        assert!(matches!(
            f.manager.create_project(USER, "nowhere", "p2", "").await,
            Err(Error::InvalidDomain(_))
        ));
        // private domain directory not created yet
        assert!(matches!(
            f.manager.create_project(USER, "private", "p2", "").await,
            Err(Error::DomainNotFound(_))
        ));
        assert!(matches!(
            f.manager.project_info(USER, DOMAIN, "missing").await,
            Err(Error::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_domain_is_idempotent_and_private_maps_to_user() {
        let f = fixture().await;
        f.manager.create_domain(USER, "private").await.unwrap();
        f.manager.create_domain(USER, "private").await.unwrap();
        f.manager.create_project(USER, "private", "mine", "").await.unwrap();

        assert!(f.temp.path().join(USER).join("mine").join("project.inf").is_file());
    }

    #[tokio::test]
    async fn test_list_projects_sorted() {
        let f = fixture().await;
        f.manager.create_project(USER, DOMAIN, "a0", "").await.unwrap();
        std::fs::create_dir(f.temp.path().join(DOMAIN).join("not-a-project")).unwrap();

        let names: Vec<_> = f
            .manager
            .list_projects(USER, DOMAIN)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["a0", "p1"]);
    }

    #[tokio::test]
    async fn test_update_project_description() {
        let f = fixture().await;
        f.manager
            .update_project_description(USER, DOMAIN, "p1", "renamed")
            .await
            .unwrap();
        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.description, "renamed");
    }

    #[tokio::test]
    async fn test_register_bundle() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "vm-support.tgz").await;

        let bundle = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "vm-support.tgz", "host logs", false)
            .await
            .unwrap();

        assert_eq!(bundle.id, 0);
        assert_eq!(bundle.name, "esx-01");
        assert_eq!(bundle.kind, ArchiveType::Tgz);
        assert!(bundle.available);
        assert!(!bundle.preserved);
        assert!(f.project_dir("p1").join("esx-01/var/log/syslog.log").is_file());
        assert!(!f.project_dir("p1").join("vm-support.tgz").exists());

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.bundles, vec![bundle]);
    }

    #[tokio::test]
    async fn test_register_duplicate_bundle_name() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "first.tgz").await;
        f.manager
            .register_bundle(USER, DOMAIN, "p1", "first.tgz", "", false)
            .await
            .unwrap();

        f.upload_bundle("p1", "esx-01", "second.zip").await;
        let err = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "second.zip", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BundleExists(name) if name == "esx-01"));
    }

    #[tokio::test]
    async fn test_register_bundle_rejects_bad_uploads() {
        let f = fixture().await;

        assert!(matches!(
            f.manager.register_bundle(USER, DOMAIN, "p1", "logs.rar", "", false).await,
            Err(Error::UnsupportedArchive(_))
        ));
        assert!(matches!(
            f.manager.register_bundle(USER, DOMAIN, "p1", "absent.tgz", "", false).await,
            Err(Error::UploadNotFound(_))
        ));
        assert!(matches!(
            f.manager.register_bundle(USER, DOMAIN, "p1", "../x.tgz", "", false).await,
            Err(Error::UploadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_preserved_bundle_keeps_archive() {
        let f = fixture().await;
        f.upload_bundle("p1", "vc-02", "upload.zip").await;

        let bundle = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "upload.zip", "", true)
            .await
            .unwrap();

        assert!(bundle.preserved);
        assert!(f.project_dir("p1").join("vc-02").is_dir());
        assert!(f.project_dir("p1").join("vc-02.zip").is_file());
        assert!(!f.project_dir("p1").join("upload.zip").exists());
    }

    #[tokio::test]
    async fn test_upload_with_extra_top_level_entries_is_rejected() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        f.manager.register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false).await.unwrap();

        // a bundle directory followed by a stray index that would replace ours
        let file = std::fs::File::create(f.project_dir("p1").join("b.tgz")).unwrap();
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            file,
            flate2::Compression::default(),
        ));
        for (path, data) in [
            ("esx-02/var/log/x.log", &b"x\n"[..]),
            ("project.inf", &br#"{"name":"p1","index":0,"bundles":[]}"#[..]),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let err = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "b.tgz", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.bundles.len(), 1);
        assert_eq!(info.bundles[0].name, "esx-01");
        assert!(!f.project_dir("p1").join("esx-02").exists());
        assert!(f.project_dir("p1").join("b.tgz").is_file());
    }

    #[tokio::test]
    async fn test_registration_survives_failed_upload_cleanup() {
        let f = fixture().await;
        f.upload_bundle("p1", "vc-02", "upload.zip").await;
        // the preserved archive name is taken by a directory, so the rename fails
        std::fs::create_dir_all(f.project_dir("p1").join("vc-02.zip/inner")).unwrap();

        let bundle = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "upload.zip", "", true)
            .await
            .unwrap();
        assert_eq!(bundle.name, "vc-02");
        assert!(f.project_dir("p1").join("upload.zip").is_file());
        assert!(f.locks.list_active_locks().await.is_empty());

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.bundles, vec![bundle]);
        assert_eq!(info.index, 1);
    }

    #[tokio::test]
    async fn test_bundle_files() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        let bundle = f.manager.register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false).await.unwrap();
        std::fs::write(
            f.project_dir("p1").join("esx-01/var/log/vmkernel.log"),
            "2019-04-01T10:00:00Z boot\n2019-04-01T12:00:00Z cpu0 warning\n",
        )
        .unwrap();

        let tree = f
            .manager
            .list_bundle_files(USER, DOMAIN, "p1", bundle.id, None)
            .await
            .unwrap();
        assert_eq!(tree.name, "esx-01");
        assert_eq!(tree.file_paths(), vec!["var/log/syslog.log", "var/log/vmkernel.log"]);

        let tree = f
            .manager
            .list_bundle_files(USER, DOMAIN, "p1", bundle.id, Some("warning"))
            .await
            .unwrap();
        assert_eq!(tree.file_paths(), vec!["var/log/vmkernel.log"]);

        let info = f
            .manager
            .bundle_file_info(USER, DOMAIN, "p1", bundle.id, "var/log/syslog.log")
            .await
            .unwrap();
        assert_eq!(info.size, "esx-01 log\n".len() as u64);

        let filter = ReadFilter {
            from: Some("2019-04-01T11:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        let content = f
            .manager
            .read_bundle_file(USER, DOMAIN, "p1", bundle.id, "var/log/vmkernel.log", &filter)
            .await
            .unwrap();
        assert_eq!(content, "2019-04-01T12:00:00Z cpu0 warning");

        assert!(matches!(
            f.manager
                .read_bundle_file(USER, DOMAIN, "p1", bundle.id, "../project.inf", &ReadFilter::default())
                .await,
            Err(Error::InvalidFilePath(_))
        ));
        assert!(matches!(
            f.manager.list_bundle_files(USER, DOMAIN, "p1", 42, None).await,
            Err(Error::BundleNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_closed_bundle_files_are_unavailable() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        let bundle = f.manager.register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false).await.unwrap();

        f.manager
            .update_project_status(USER, DOMAIN, "p1", "close")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(matches!(
            f.manager.list_bundle_files(USER, DOMAIN, "p1", bundle.id, None).await,
            Err(Error::BundleUnavailable(_))
        ));
        assert!(matches!(
            f.manager
                .bundle_file_info(USER, DOMAIN, "p1", bundle.id, "var/log/syslog.log")
                .await,
            Err(Error::BundleUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_get_unique_ids() {
        let f = fixture().await;
        for i in 0..6 {
            f.upload_bundle("p1", &format!("host-{}", i), &format!("u{}.tgz", i))
                .await;
        }

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let manager = f.manager.clone();
                tokio::spawn(async move {
                    manager
                        .register_bundle(USER, DOMAIN, "p1", &format!("u{}.tgz", i), "", false)
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.index, 6);
        assert_eq!(info.bundles.len(), 6);
    }

    #[tokio::test]
    async fn test_retry_after_failed_index_write() {
        let repo = Arc::new(MemoryIndexRepository::new());
        let f = fixture_with(repo.clone(), 5);
        f.manager.create_domain(USER, DOMAIN).await.unwrap();
        f.manager.create_project(USER, DOMAIN, "p1", "").await.unwrap();
        f.upload_bundle("p1", "esx-01", "vm-support.tgz").await;

        repo.fail_next_writes(1);
        let err = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "vm-support.tgz", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IndexWrite { .. }));
        assert!(f.locks.list_active_locks().await.is_empty());
        // upload is kept so the call can be repeated
        assert!(f.project_dir("p1").join("vm-support.tgz").is_file());

        let bundle = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "vm-support.tgz", "", false)
            .await
            .unwrap();
        assert_eq!(bundle.id, 0);

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.bundles.len(), 1);
        assert_eq!(info.index, 1);
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        f.upload_bundle("p1", "vc-02", "b.zip").await;
        f.manager.register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false).await.unwrap();
        f.manager.register_bundle(USER, DOMAIN, "p1", "b.zip", "", false).await.unwrap();

        let transition = f
            .manager
            .update_project_status(USER, DOMAIN, "p1", "close")
            .await
            .unwrap();
        assert_eq!(transition.status(), ProjectStatus::Close);

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.status, ProjectStatus::Close);
        assert!(info.closed.is_some());

        let report = transition.wait().await.unwrap();
        assert!(report.applied);
        assert_eq!(report.failed, Vec::<u64>::new());
        assert!(!f.project_dir("p1").join("esx-01").exists());
        assert!(f.project_dir("p1").join("esx-01.tgz").is_file());
        assert!(f.project_dir("p1").join("vc-02.zip").is_file());

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert!(info.bundles.iter().all(|b| !b.available));

        f.manager
            .update_project_status(USER, DOMAIN, "p1", "open")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(info.status, ProjectStatus::Open);
        assert!(info.closed.is_none());
        assert!(info.bundles.iter().all(|b| b.available));
        assert!(f.project_dir("p1").join("esx-01/var/log/syslog.log").is_file());
        assert!(!f.project_dir("p1").join("esx-01.tgz").exists());
    }

    #[tokio::test]
    async fn test_failed_bundle_stays_unavailable_on_open() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        f.upload_bundle("p1", "esx-02", "b.tgz").await;
        f.manager.register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false).await.unwrap();
        let broken = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "b.tgz", "", false)
            .await
            .unwrap();

        f.manager
            .update_project_status(USER, DOMAIN, "p1", "close")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        std::fs::write(f.project_dir("p1").join("esx-02.tgz"), b"truncated").unwrap();

        let report = f
            .manager
            .update_project_status(USER, DOMAIN, "p1", "open")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.failed, vec![broken.id]);

        let info = f.manager.project_info(USER, DOMAIN, "p1").await.unwrap();
        assert!(info.bundle(0).unwrap().available);
        assert!(!info.bundle(broken.id).unwrap().available);
    }

    #[tokio::test]
    async fn test_status_validation() {
        let f = fixture().await;

        let err = f
            .manager
            .update_project_status(USER, DOMAIN, "p1", "archived")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(_)));
        assert!(err.is_external());

        let err = f
            .manager
            .update_project_status(USER, DOMAIN, "p1", "open")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StatusUnchanged { .. }));
        assert!(f.locks.list_active_locks().await.is_empty());
    }

    #[tokio::test]
    async fn test_busy_index_lock() {
        let f = fixture_with(Arc::new(JsonIndexRepository::new()), 1);
        f.manager.create_domain(USER, DOMAIN).await.unwrap();
        f.manager.create_project(USER, DOMAIN, "p1", "").await.unwrap();

        let key = ResourceTree::lock_key(USER, DOMAIN, "p1");
        assert!(f.locks.try_acquire(&key, "someone-else").await);

        let err = f
            .manager
            .update_project_description(USER, DOMAIN, "p1", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Lock(LockError::Busy { .. })));
        assert!(err.is_retryable());

        f.locks.release(&key, "someone-else").await;
        f.manager
            .update_project_description(USER, DOMAIN, "p1", "x")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bundle_description_and_delete() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        let bundle = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "a.tgz", "", true)
            .await
            .unwrap();

        f.manager
            .update_bundle_description(USER, DOMAIN, "p1", bundle.id, "noted")
            .await
            .unwrap();
        assert_eq!(
            f.manager.bundle_info(USER, DOMAIN, "p1", bundle.id).await.unwrap().description,
            "noted"
        );

        assert!(matches!(
            f.manager.update_bundle_description(USER, DOMAIN, "p1", 42, "x").await,
            Err(Error::BundleNotFound(42))
        ));
        assert!(f.locks.list_active_locks().await.is_empty());

        f.manager.delete_bundle(USER, DOMAIN, "p1", bundle.id).await.unwrap();
        assert!(!f.project_dir("p1").join("esx-01").exists());
        assert!(!f.project_dir("p1").join("esx-01.tgz").exists());
        assert!(f.manager.list_bundles(USER, DOMAIN, "p1").await.unwrap().is_empty());

        assert!(matches!(
            f.manager.delete_bundle(USER, DOMAIN, "p1", bundle.id).await,
            Err(Error::BundleNotFound(_))
        ));

        // ids are never reused
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        let again = f
            .manager
            .register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false)
            .await
            .unwrap();
        assert_eq!(again.id, 1);
    }

    #[tokio::test]
    async fn test_stats_lifecycle() {
        let f = fixture().await;
        std::fs::write(f.project_dir("p1").join("esxtop.csv"), "cpu,mem\n1,2\n").unwrap();

        let stats = f
            .manager
            .register_stats(USER, DOMAIN, "p1", "esxtop.csv", "perf")
            .await
            .unwrap();
        assert_eq!(stats.name, "esxtop");
        assert_eq!(stats.kind, ".db");
        assert!(stats.available);
        assert!(f.project_dir("p1").join("esxtop.db").is_file());
        assert!(!f.project_dir("p1").join("esxtop.csv").exists());

        let counters = f
            .manager
            .stats_counters(USER, DOMAIN, "p1", stats.id, CounterSet::All)
            .await
            .unwrap();
        assert_eq!(counters, vec!["cpu", "mem"]);
        let nonzero = f
            .manager
            .stats_counters(USER, DOMAIN, "p1", stats.id, CounterSet::Nonzero)
            .await
            .unwrap();
        assert_eq!(nonzero, vec!["cpu"]);

        let data = f
            .manager
            .stats_data(USER, DOMAIN, "p1", stats.id, &["mem".to_string()])
            .await
            .unwrap();
        assert_eq!(data, serde_json::json!({ "counters": ["mem"] }));
        assert!(matches!(
            f.manager.stats_data(USER, DOMAIN, "p1", 99, &["mem".to_string()]).await,
            Err(Error::StatsNotFound(99))
        ));

        f.manager
            .update_stats_description(USER, DOMAIN, "p1", stats.id, "updated")
            .await
            .unwrap();
        assert_eq!(f.manager.list_stats(USER, DOMAIN, "p1").await.unwrap()[0].description, "updated");

        std::fs::write(f.project_dir("p1").join("esxtop.csv"), "cpu\n").unwrap();
        assert!(matches!(
            f.manager.register_stats(USER, DOMAIN, "p1", "esxtop.csv", "").await,
            Err(Error::StatsExists(_))
        ));

        f.manager.delete_stats(USER, DOMAIN, "p1", stats.id).await.unwrap();
        assert!(!f.project_dir("p1").join("esxtop.db").exists());
        assert!(matches!(
            f.manager.stats_info(USER, DOMAIN, "p1", stats.id).await,
            Err(Error::StatsNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_conversion_removes_upload() {
        let f = fixture().await;
        std::fs::write(f.project_dir("p1").join("broken.csv"), "bad data").unwrap();

        let err = f
            .manager
            .register_stats(USER, DOMAIN, "p1", "broken.csv", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StatsConversion(_)));
        assert!(!err.is_external());
        assert!(!f.project_dir("p1").join("broken.csv").exists());
        assert!(f.manager.list_stats(USER, DOMAIN, "p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_orphans() {
        let f = fixture().await;
        f.upload_bundle("p1", "esx-01", "a.tgz").await;
        f.manager.register_bundle(USER, DOMAIN, "p1", "a.tgz", "", false).await.unwrap();
        std::fs::create_dir(f.project_dir("p1").join("half-extracted")).unwrap();
        std::fs::write(f.project_dir("p1").join("stray.csv"), "").unwrap();

        let orphans = f.manager.find_orphans(USER, DOMAIN, "p1").await.unwrap();
        assert_eq!(orphans, vec!["half-extracted", "stray.csv"]);
    }

    #[tokio::test]
    async fn test_delete_project() {
        let f = fixture().await;
        f.manager.delete_project(USER, DOMAIN, "p1").await.unwrap();
        assert!(!f.project_dir("p1").exists());
        assert!(matches!(
            f.manager.delete_project(USER, DOMAIN, "p1").await,
            Err(Error::ProjectNotFound(_))
        ));
        assert!(f.locks.list_active_locks().await.is_empty());
    }
}
