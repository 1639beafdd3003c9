//! Lock types and error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Identity used by the coordinator when it answers requests
pub const COORDINATOR_IDENTITY: &str = "coordinator";

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Every acquisition attempt found the key held by someone else
    #[error("Busy resource: {key}")]
    Busy { key: String },

    /// The coordinator did not answer in time
    #[error("Timeout waiting for coordinator: {command} {key}")]
    Timeout { command: LockCommand, key: String },

    /// Programmer error (e.g. zero retry attempts)
    #[error("Invalid lock argument: {0}")]
    InvalidArgument(String),

    /// The coordinator answered with a failure
    #[error("Lock request rejected: {0}")]
    Rejected(String),

    /// Socket or encoding failure between worker and coordinator
    #[error("Lock transport error: {0}")]
    Transport(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Busy { .. } => "E300",
            Self::Timeout { .. } => "E301",
            Self::InvalidArgument(_) => "E302",
            Self::Rejected(_) => "E303",
            Self::Transport(_) => "E304",
        }
    }

    /// Busy and timeout happen strictly before any index access, so the
    /// whole operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::Timeout { .. } | Self::Rejected(_) | Self::Transport(_)
        )
    }
}

/// Command carried by a request message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockCommand {
    Lock,
    Unlock,
}

impl LockCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

impl fmt::Display for LockCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub key: String,
    pub holder: String,
}

/// Holder identity of the current process
pub fn process_identity() -> String {
    std::process::id().to_string()
}

/// Configuration for lock acquisition and the coordinator channel
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Unix socket the coordinator listens on
    pub socket_path: PathBuf,

    /// Attempts made by `acquire` before giving up with `Busy`
    pub max_attempts: u32,

    /// Delay between two acquisition attempts
    pub retry_interval: Duration,

    /// How long a worker waits for a `lock` response
    pub lock_timeout: Duration,

    /// How long a worker waits for an `unlock` response
    pub unlock_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("logvault-lock.sock"),
            max_attempts: 3,
            retry_interval: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(3),
            unlock_timeout: Duration::from_secs(1),
        }
    }
}

impl LockConfig {
    /// Create a config with a custom socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set the number of acquisition attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff between attempts
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the worker-side response timeouts
    pub fn with_timeouts(mut self, lock: Duration, unlock: Duration) -> Self {
        self.lock_timeout = lock;
        self.unlock_timeout = unlock;
        self
    }

    pub fn timeout_for(&self, command: LockCommand) -> Duration {
        match command {
            LockCommand::Lock => self.lock_timeout,
            LockCommand::Unlock => self.unlock_timeout,
        }
    }
}
