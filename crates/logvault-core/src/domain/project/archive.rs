//! Archive operations over bundle directories
//!
//! `ArchiveTool` is the narrow interface to the tar/zip machinery.
//! `compress_bundle` and `decompress_bundle` build the per-bundle steps on
//! top of it; both are idempotent by name, so re-running one after a crash
//! finishes the job instead of failing.
//!
//! A bundle directory only ever appears or disappears through a rename:
//! archives are unpacked into a hidden staging directory first, and
//! directories are renamed away before they are deleted. A directory under a
//! bundle's name is therefore always complete.

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

use super::types::{ArchiveType, BundleInfo};

/// What `compress` produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// Archive tool used by the lifecycle manager
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Name of the archive's root entry, read without extracting
    async fn peek_root(&self, archive: &Path, kind: ArchiveType) -> Result<String>;

    /// Extract everything into `dest_dir`; the archive itself is left alone
    async fn extract(&self, archive: &Path, kind: ArchiveType, dest_dir: &Path) -> Result<()>;

    /// Pack `source_dir` as a single root entry named after the directory
    async fn compress(
        &self,
        source_dir: &Path,
        kind: ArchiveType,
        archive: &Path,
    ) -> Result<ArchiveInfo>;
}

/// Unpack `archive` as `project_dir/<root>`.
///
/// The archive must hold exactly one top-level entry: a directory named
/// `root`. Anything else is rejected before the project directory is touched.
pub async fn extract_bundle_root(
    tool: &dyn ArchiveTool,
    archive: &Path,
    kind: ArchiveType,
    project_dir: &Path,
    root: &str,
) -> Result<()> {
    let staging = project_dir.join(format!(".{}.{}.extracting", root, Uuid::new_v4()));
    tokio::fs::create_dir(&staging).await?;

    let result = move_single_root(tool, archive, kind, &staging, &project_dir.join(root), root).await;

    match tokio::fs::remove_dir_all(&staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "Failed to remove staging directory"),
    }
    result
}

async fn move_single_root(
    tool: &dyn ArchiveTool,
    archive: &Path,
    kind: ArchiveType,
    staging: &Path,
    dest: &Path,
    root: &str,
) -> Result<()> {
    tool.extract(archive, kind, staging).await?;

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(staging).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    if names != [root] {
        return Err(archive_err(
            archive,
            format!(
                "expected a single root entry {}, found: {}",
                root,
                names.join(", ")
            ),
        ));
    }

    let extracted = staging.join(root);
    if !tokio::fs::symlink_metadata(&extracted).await?.is_dir() {
        return Err(archive_err(archive, format!("root entry {} is not a directory", root)));
    }

    tokio::fs::rename(&extracted, dest)
        .await
        .map_err(|e| archive_err(dest, e))
}

/// Delete a bundle directory; its name is gone as soon as this starts
pub async fn remove_bundle_dir(dir: &Path) -> Result<()> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| archive_err(dir, "directory has no name"))?;
    let doomed = dir.with_file_name(format!(".{}.{}.removing", name, Uuid::new_v4()));

    tokio::fs::rename(dir, &doomed).await?;
    tokio::fs::remove_dir_all(&doomed).await?;
    Ok(())
}

/// Compress a bundle directory back into `<name><type>` and remove the directory.
///
/// A preserved bundle already has its original archive, so only the
/// directory is removed.
pub async fn compress_bundle(
    tool: &dyn ArchiveTool,
    project_dir: &Path,
    bundle: &BundleInfo,
) -> Result<()> {
    let dir = project_dir.join(&bundle.name);
    let archive = project_dir.join(bundle.archive_file_name());

    let dir_exists = tokio::fs::try_exists(&dir).await?;
    let archive_exists = tokio::fs::try_exists(&archive).await?;

    if !dir_exists {
        if archive_exists {
            debug!(bundle = %bundle.name, "Bundle already compressed");
            return Ok(());
        }
        return Err(Error::Archive(format!(
            "{} has neither a directory nor an archive",
            bundle.name
        )));
    }

    if !(bundle.preserved && archive_exists) {
        tool.compress(&dir, bundle.kind, &archive).await?;
    }

    remove_bundle_dir(&dir).await?;
    info!(path = %dir.display(), "Bundle was compressed successfully");
    Ok(())
}

/// Decompress `<name><type>` into its directory.
///
/// The archive is removed afterwards unless the bundle is preserved. If the
/// directory is already there the archive is left alone.
pub async fn decompress_bundle(
    tool: &dyn ArchiveTool,
    project_dir: &Path,
    bundle: &BundleInfo,
) -> Result<()> {
    let dir = project_dir.join(&bundle.name);
    let archive = project_dir.join(bundle.archive_file_name());

    if tokio::fs::try_exists(&dir).await? {
        debug!(bundle = %bundle.name, "Bundle already decompressed");
        return Ok(());
    }

    if !tokio::fs::try_exists(&archive).await? {
        return Err(Error::Archive(format!(
            "{} has neither a directory nor an archive",
            bundle.name
        )));
    }

    extract_bundle_root(tool, &archive, bundle.kind, project_dir, &bundle.name).await?;

    if !bundle.preserved {
        tokio::fs::remove_file(&archive).await?;
    }

    info!(path = %archive.display(), "Bundle was decompressed successfully");
    Ok(())
}

/// tar.gz and zip support on top of the `tar`, `flate2` and `zip` crates.
///
/// The work is synchronous and runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct TarZipArchiver;

impl TarZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

fn archive_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Archive(format!("{}: {}", path.display(), e))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Archive(format!("archive task failed: {}", e)))?
}

/// First normal component of an entry path (`./esx-01/x` -> `esx-01`)
fn root_component(path: &Path) -> Option<String> {
    path.components().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}

fn peek_tgz(archive: &Path) -> Result<String> {
    let file = File::open(archive).map_err(|e| archive_err(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let entries = tar.entries().map_err(|e| archive_err(archive, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| archive_err(archive, e))?;
        let path = entry.path().map_err(|e| archive_err(archive, e))?;
        if let Some(root) = root_component(&path) {
            return Ok(root);
        }
    }

    Err(archive_err(archive, "archive is empty"))
}

fn peek_zip(archive: &Path) -> Result<String> {
    let file = File::open(archive).map_err(|e| archive_err(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| archive_err(archive, e))?;

    for i in 0..zip.len() {
        let entry = zip.by_index_raw(i).map_err(|e| archive_err(archive, e))?;
        if let Some(root) = root_component(Path::new(entry.name())) {
            return Ok(root);
        }
    }

    Err(archive_err(archive, "archive is empty"))
}

fn extract_tgz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| archive_err(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest).map_err(|e| archive_err(archive, e))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| archive_err(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| archive_err(archive, e))?;
    zip.extract(dest).map_err(|e| archive_err(archive, e))
}

fn compress_tgz(source: &Path, root: &str, out: &Path) -> Result<()> {
    let file = File::create(out).map_err(|e| archive_err(out, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(root, source)
        .map_err(|e| archive_err(source, e))?;
    let encoder = builder.into_inner().map_err(|e| archive_err(out, e))?;
    encoder.finish().map_err(|e| archive_err(out, e))?;
    Ok(())
}

fn compress_zip(source: &Path, root: &str, out: &Path) -> Result<()> {
    let file = File::create(out).map_err(|e| archive_err(out, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(source)
        .sort_by(|a, b| a.path().cmp(b.path()))
        .into_iter()
    {
        let entry = entry.map_err(|e| archive_err(source, e))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| archive_err(entry.path(), e))?;

        let mut name = root.to_string();
        for component in rel.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)
                .map_err(|e| archive_err(entry.path(), e))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)
                .map_err(|e| archive_err(entry.path(), e))?;
            let mut input = File::open(entry.path()).map_err(|e| archive_err(entry.path(), e))?;
            io::copy(&mut input, &mut zip).map_err(|e| archive_err(entry.path(), e))?;
        }
    }

    zip.finish().map_err(|e| archive_err(out, e))?;
    Ok(())
}

#[async_trait]
impl ArchiveTool for TarZipArchiver {
    async fn peek_root(&self, archive: &Path, kind: ArchiveType) -> Result<String> {
        let archive = archive.to_path_buf();
        blocking(move || match kind {
            ArchiveType::Tgz => peek_tgz(&archive),
            ArchiveType::Zip => peek_zip(&archive),
        })
        .await
    }

    async fn extract(&self, archive: &Path, kind: ArchiveType, dest_dir: &Path) -> Result<()> {
        let archive = archive.to_path_buf();
        let dest = dest_dir.to_path_buf();
        blocking(move || match kind {
            ArchiveType::Tgz => extract_tgz(&archive, &dest),
            ArchiveType::Zip => extract_zip(&archive, &dest),
        })
        .await
    }

    async fn compress(
        &self,
        source_dir: &Path,
        kind: ArchiveType,
        archive: &Path,
    ) -> Result<ArchiveInfo> {
        let source = source_dir.to_path_buf();
        let out = archive.to_path_buf();

        blocking(move || {
            let root = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| archive_err(&source, "directory has no name"))?;

            // Write next to the target and rename, so a crash never leaves a
            // truncated archive under the real name.
            let partial = out.with_extension("partial");
            let packed = match kind {
                ArchiveType::Tgz => compress_tgz(&source, &root, &partial),
                ArchiveType::Zip => compress_zip(&source, &root, &partial),
            };
            if let Err(e) = packed {
                let _ = std::fs::remove_file(&partial);
                return Err(e);
            }

            std::fs::rename(&partial, &out).map_err(|e| archive_err(&out, e))?;
            let size = std::fs::metadata(&out).map_err(|e| archive_err(&out, e))?.len();
            Ok(ArchiveInfo { path: out, size })
        })
        .await
    }
}
