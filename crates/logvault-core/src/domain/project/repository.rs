//! Index repository implementations

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::repository_trait::IndexRepository;
use super::types::ProjectInfo;

/// `project.inf` files on disk, replaced atomically via temp file + rename
#[derive(Debug, Clone, Default)]
pub struct JsonIndexRepository;

impl JsonIndexRepository {
    pub fn new() -> Self {
        Self
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl IndexRepository for JsonIndexRepository {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn read_index(&self, path: &Path) -> Result<ProjectInfo> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::IndexRead {
                path: display(path),
                reason: e.to_string(),
            })?;

        serde_json::from_str(&contents).map_err(|e| Error::IndexRead {
            path: display(path),
            reason: e.to_string(),
        })
    }

    async fn write_index(&self, path: &Path, info: &ProjectInfo) -> Result<()> {
        let json = serde_json::to_vec_pretty(info).map_err(|e| Error::IndexWrite {
            path: display(path),
            reason: e.to_string(),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let write_err = |e: std::io::Error| Error::IndexWrite {
            path: display(path),
            reason: e.to_string(),
        };

        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(path = %path.display(), index = info.index, "Index written");
        Ok(())
    }

    async fn remove_index(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory index store with write-fault injection, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryIndexRepository {
    indexes: Mutex<HashMap<PathBuf, ProjectInfo>>,
    failing_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryIndexRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with an `IndexWrite` error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self, path: &Path) -> Option<ProjectInfo> {
        self.indexes.lock().await.get(path).cloned()
    }
}

#[async_trait]
impl IndexRepository for MemoryIndexRepository {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.indexes.lock().await.contains_key(path))
    }

    async fn read_index(&self, path: &Path) -> Result<ProjectInfo> {
        self.indexes
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::IndexRead {
                path: display(path),
                reason: "no such index".to_string(),
            })
    }

    async fn write_index(&self, path: &Path, info: &ProjectInfo) -> Result<()> {
        let should_fail = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::IndexWrite {
                path: display(path),
                reason: "injected write failure".to_string(),
            });
        }

        self.indexes
            .lock()
            .await
            .insert(path.to_path_buf(), info.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_index(&self, path: &Path) -> Result<()> {
        self.indexes.lock().await.remove(path);
        Ok(())
    }
}
