//! Error types for Logvault

use crate::domain::locking::LockError;
use thiserror::Error;

/// Result type alias using Logvault's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Who can fix an error: the caller (bad input) or an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-correctable: bad name, missing resource, duplicate, bad status
    External,
    /// Filesystem, archive, lock or converter failure
    Internal,
}

/// Logvault error types
#[derive(Error, Debug)]
pub enum Error {
    // Domain errors (E001-E099)
    #[error("domain: {0} is invalid name.")]
    InvalidDomain(String),

    #[error("domain: {0} is invalid resource.")]
    DomainNotFound(String),

    // Project errors (E100-E199)
    #[error("project: {0} is invalid name. (should match ^[0-9a-zA-Z#@_+-]+$)")]
    InvalidProjectName(String),

    #[error("project: {0} is invalid resource.")]
    ProjectNotFound(String),

    #[error("project: {0} has already existed.")]
    ProjectExists(String),

    #[error("project: {0} is not a state.")]
    InvalidStatus(String),

    #[error("project: {project} is already {status}.")]
    StatusUnchanged { project: String, status: String },

    // Bundle errors (E200-E299)
    #[error("bundle: bundle ID = {0} is invalid resource.")]
    BundleNotFound(u64),

    #[error("bundle: {0} has already existed.")]
    BundleExists(String),

    #[error("bundle: {0} is not a supported archive (.tgz, .tar.gz or .zip).")]
    UnsupportedArchive(String),

    #[error("bundle: {0} couldn't be found in the project.")]
    UploadNotFound(String),

    #[error("bundle: bundle ID = {0} is not available.")]
    BundleUnavailable(u64),

    #[error("file: {0} is invalid resource.")]
    FileNotFound(String),

    #[error("file: {0} is invalid path.")]
    InvalidFilePath(String),

    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Stats errors (E400-E499)
    #[error("stats: stats ID = {0} is invalid resource.")]
    StatsNotFound(u64),

    #[error("stats: {0} has already existed.")]
    StatsExists(String),

    #[error("stats: conversion failed: {0}")]
    StatsConversion(String),

    // Archive errors (E500-E599)
    #[error("archive: {0}")]
    Archive(String),

    // Index errors (E600-E699)
    #[error("index: {path} couldn't be read: {reason}")]
    IndexRead { path: String, reason: String },

    #[error("index: {path} couldn't be written: {reason}")]
    IndexWrite { path: String, reason: String },

    // Config errors (E700-E799)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDomain(_) => "E001",
            Self::DomainNotFound(_) => "E002",
            Self::InvalidProjectName(_) => "E100",
            Self::ProjectNotFound(_) => "E101",
            Self::ProjectExists(_) => "E102",
            Self::InvalidStatus(_) => "E103",
            Self::StatusUnchanged { .. } => "E104",
            Self::BundleNotFound(_) => "E200",
            Self::BundleExists(_) => "E201",
            Self::UnsupportedArchive(_) => "E202",
            Self::UploadNotFound(_) => "E203",
            Self::BundleUnavailable(_) => "E204",
            Self::FileNotFound(_) => "E205",
            Self::InvalidFilePath(_) => "E206",
            Self::Lock(e) => e.code(),
            Self::StatsNotFound(_) => "E400",
            Self::StatsExists(_) => "E401",
            Self::StatsConversion(_) => "E402",
            Self::Archive(_) => "E500",
            Self::IndexRead { .. } => "E600",
            Self::IndexWrite { .. } => "E601",
            Self::ConfigError(_) => "E700",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Classify the error as caller-correctable or internal
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDomain(_)
            | Self::DomainNotFound(_)
            | Self::InvalidProjectName(_)
            | Self::ProjectNotFound(_)
            | Self::ProjectExists(_)
            | Self::InvalidStatus(_)
            | Self::StatusUnchanged { .. }
            | Self::BundleNotFound(_)
            | Self::BundleExists(_)
            | Self::UnsupportedArchive(_)
            | Self::UploadNotFound(_)
            | Self::BundleUnavailable(_)
            | Self::FileNotFound(_)
            | Self::InvalidFilePath(_)
            | Self::StatsNotFound(_)
            | Self::StatsExists(_) => ErrorKind::External,
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_external(&self) -> bool {
        self.kind() == ErrorKind::External
    }

    /// Whether retrying the whole operation from the top is safe
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_transient())
    }

    /// Message suitable for the end user.
    ///
    /// Internal errors are logged here with full detail and replaced by a
    /// generic message.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::External => self.to_string(),
            ErrorKind::Internal => {
                tracing::error!(code = self.code(), error = %self, "internal error");
                "Internal error occurred. Please contact an administrator.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_errors_keep_their_message() {
        let err = Error::ProjectExists("p1".to_string());
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!(err.user_message(), "project: p1 has already existed.");
        assert_eq!(err.code(), "E102");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = Error::Archive("tar: unexpected EOF".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.user_message().contains("contact an administrator"));
        assert!(!err.user_message().contains("EOF"));
    }

    #[test]
    fn test_lock_errors_are_internal_and_retryable() {
        let err: Error = LockError::Busy {
            key: "dom/p1/project.inf".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.is_retryable());
        assert_eq!(err.code(), "E300");

        let err: Error = LockError::InvalidArgument("max_attempts must be >= 1".to_string()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert_eq!(err.code(), "E9999");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
