//! Read-only access to the files of an extracted bundle
//!
//! Paths are always relative to the bundle directory and may only contain
//! plain components; symlinks are never followed out of the bundle.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// One node of a bundle's file tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub file: bool,
    /// Present for directories only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    /// Relative paths of every file below this node
    pub fn file_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for child in self.children.iter().flatten() {
            child.collect_paths("", &mut out);
        }
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", prefix, self.name)
        };
        if self.file {
            out.push(path);
        } else {
            for child in self.children.iter().flatten() {
                child.collect_paths(&path, out);
            }
        }
    }
}

/// Metadata of a file or directory inside a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    /// Path relative to the bundle directory
    pub path: String,
    pub is_directory: bool,
    /// Entry names, for directories
    pub children: Option<Vec<String>>,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Line filters for `read_filtered`.
///
/// The date range only applies to files whose first line starts with a
/// timestamp; lines without one are then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadFilter {
    /// Keep lines containing this text
    pub text: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReadFilter {
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty) && self.from.is_none() && self.to.is_none()
    }

    fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }
}

/// Leading timestamp of a log line (RFC 3339, or ISO 8601 without offset as UTC)
pub fn line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let token = line.split_whitespace().next()?;
    let token = token.trim_start_matches('[').trim_end_matches(']');

    if let Ok(at) = DateTime::parse_from_rfc3339(token) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|at| at.and_utc())
}

/// Tree of `root`; with `search`, only files containing the text are listed
pub async fn list_tree(root: &Path, search: Option<&str>) -> Result<FileNode> {
    let root = root.to_path_buf();
    let search = search.filter(|s| !s.is_empty()).map(str::to_string);
    blocking(move || {
        tree_node(&root, search.as_deref())?
            .ok_or_else(|| Error::Other(format!("{} is not a directory", root.display())))
    })
    .await
}

pub async fn file_info(root: &Path, relative: &str) -> Result<FileInfo> {
    let root = root.to_path_buf();
    let relative = relative.to_string();
    blocking(move || {
        let path = resolve(&root, &relative)?;
        let meta = std::fs::metadata(&path).map_err(|e| not_found(&relative, e))?;

        let children = if meta.is_dir() {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                names.push(entry?.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Some(names)
        } else {
            None
        };

        Ok(FileInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: relative,
            is_directory: meta.is_dir(),
            children,
            size: meta.len(),
            modified_at: DateTime::<Utc>::from(meta.modified()?),
        })
    })
    .await
}

/// Content of a file, restricted by `filter`
pub async fn read_filtered(root: &Path, relative: &str, filter: &ReadFilter) -> Result<String> {
    let root = root.to_path_buf();
    let relative = relative.to_string();
    let filter = filter.clone();
    blocking(move || {
        let path = resolve(&root, &relative)?;
        if !std::fs::metadata(&path).map_err(|e| not_found(&relative, e))?.is_file() {
            return Err(Error::FileNotFound(relative));
        }

        let bytes = std::fs::read(&path)?;
        let content = String::from_utf8_lossy(&bytes);
        if filter.is_empty() {
            return Ok(content.into_owned());
        }

        let text = filter.text.as_deref().filter(|t| !t.is_empty());
        let dated = (filter.from.is_some() || filter.to.is_some())
            && content.lines().next().and_then(line_timestamp).is_some();

        let lines: Vec<&str> = content
            .lines()
            .filter(|line| text.is_none_or(|t| line.contains(t)))
            .filter(|line| !dated || line_timestamp(line).is_some_and(|at| filter.in_range(at)))
            .collect();
        Ok(lines.join("\n"))
    })
    .await
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("file task failed: {}", e)))?
}

fn not_found(relative: &str, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::FileNotFound(relative.to_string())
    } else {
        e.into()
    }
}

/// Join `relative` onto `root`, refusing anything that could leave it
fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(Error::InvalidFilePath(relative.to_string())),
        }
    }

    let canonical_root = root.canonicalize()?;
    match path.canonicalize() {
        Ok(canonical) if canonical.starts_with(&canonical_root) => Ok(path),
        Ok(_) => Err(Error::InvalidFilePath(relative.to_string())),
        Err(e) => Err(not_found(relative, e)),
    }
}

fn tree_node(path: &Path, search: Option<&str>) -> Result<Option<FileNode>> {
    let meta = std::fs::symlink_metadata(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if meta.is_dir() {
        let mut children = Vec::new();
        for entry in std::fs::read_dir(path)? {
            if let Some(child) = tree_node(&entry?.path(), search)? {
                children.push(child);
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        return Ok(Some(FileNode {
            name,
            file: false,
            children: Some(children),
        }));
    }

    if !meta.is_file() {
        return Ok(None);
    }

    if let Some(text) = search {
        let bytes = std::fs::read(path)?;
        if !String::from_utf8_lossy(&bytes).contains(text) {
            return Ok(None);
        }
    }

    Ok(Some(FileNode {
        name,
        file: true,
        children: None,
    }))
}
