//! Logvault Core Library
//!
//! Storage and coordination for a shared repository of log bundles:
//! - Cross-process locking (coordinator-owned ledger, Unix socket protocol)
//! - Project tree with a `project.inf` JSON index per project
//! - Bundle registration and open/close lifecycle over tar.gz and zip archives
//! - Stats datasets produced by an external converter
//! - TOML configuration

pub mod config;
pub mod domain;
pub mod error;

pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::locking::{LockClient, LockConfig, LockManager, LockServer};
    pub use crate::domain::project::{ProjectManager, ProjectStatus, ResourceTree};
    pub use crate::error::{Error, Result};
}
