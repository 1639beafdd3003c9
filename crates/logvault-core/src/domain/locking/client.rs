//! Lock client used by every caller
//!
//! `lock` / `unlock` look the same whether the process is the coordinator or
//! a worker. The coordinator goes straight to its own ledger; a worker goes
//! through the protocol. Keeping the two paths in one explicit `match` avoids
//! the coordinator ever messaging itself.

use super::channel::WorkerChannel;
use super::manager::LockManager;
use super::types::{LockCommand, LockConfig, LockError, LockResult, process_identity};
use std::sync::Arc;
use tracing::debug;

/// Where lock requests are served
#[derive(Debug, Clone)]
pub enum LockMode {
    /// This process owns the ledger
    Coordinator(LockManager),
    /// This process asks the coordinator over its socket
    Worker(Arc<WorkerChannel>),
}

#[derive(Debug, Clone)]
pub struct LockClient {
    identity: String,
    mode: LockMode,
}

impl LockClient {
    /// Client for the coordinating process, backed by `manager`
    pub fn coordinator(manager: LockManager) -> Self {
        Self {
            identity: process_identity(),
            mode: LockMode::Coordinator(manager),
        }
    }

    /// Client for a worker process talking to the coordinator socket
    pub fn worker(config: LockConfig) -> Self {
        Self::worker_with_identity(process_identity(), config)
    }

    /// Worker client with an explicit holder identity
    pub fn worker_with_identity(identity: impl Into<String>, config: LockConfig) -> Self {
        let identity = identity.into();
        Self {
            mode: LockMode::Worker(Arc::new(WorkerChannel::new(identity.clone(), config))),
            identity,
        }
    }

    /// Coordinator client with an explicit holder identity
    pub fn coordinator_with_identity(identity: impl Into<String>, manager: LockManager) -> Self {
        Self {
            identity: identity.into(),
            mode: LockMode::Coordinator(manager),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn mode(&self) -> &LockMode {
        &self.mode
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self.mode, LockMode::Coordinator(_))
    }

    /// Acquire `key`, failing with `Busy` or `Timeout`
    pub async fn lock(&self, key: &str) -> LockResult<()> {
        debug!(lock_key = %key, holder = %self.identity, "lock");

        match &self.mode {
            LockMode::Coordinator(manager) => {
                manager
                    .acquire(key, &self.identity, manager.config().max_attempts)
                    .await
            }
            LockMode::Worker(channel) => {
                let response = channel.request(LockCommand::Lock, key).await?;
                if response.result {
                    Ok(())
                } else {
                    Err(rejection(key, response.detail))
                }
            }
        }
    }

    /// Release `key`; releasing a lock held by someone else is a no-op
    pub async fn unlock(&self, key: &str) -> LockResult<()> {
        debug!(lock_key = %key, holder = %self.identity, "unlock");

        match &self.mode {
            LockMode::Coordinator(manager) => {
                manager.release(key, &self.identity).await;
                Ok(())
            }
            LockMode::Worker(channel) => {
                let response = channel.request(LockCommand::Unlock, key).await?;
                if response.result {
                    Ok(())
                } else {
                    Err(rejection(key, response.detail))
                }
            }
        }
    }
}

fn rejection(key: &str, detail: String) -> LockError {
    if detail.starts_with("Busy resource") {
        LockError::Busy {
            key: key.to_string(),
        }
    } else {
        LockError::Rejected(detail)
    }
}
