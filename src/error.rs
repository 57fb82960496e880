// src/error.rs

//! Error taxonomy for the transaction engine
//!
//! Every failure a transaction can hit is a distinct variant here. The
//! coordinator never retries or downgrades any of them; each one is handed
//! to the event sink exactly once (see [`crate::events::report_error`]).

use std::fmt;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// A dependency the backend reported as missing after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// Package that declares the dependency
    pub target: String,
    /// The dependency string as declared (may carry a version constraint)
    pub dependency: String,
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} requires {}", self.target, self.dependency)
    }
}

/// A file claimed by a target package that is already present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConflict {
    /// Package being installed
    pub target: String,
    /// Conflicting file path
    pub file: String,
    /// Installed package owning the file, `None` for an unowned file on disk
    pub owner: Option<String>,
}

impl fmt::Display for FileConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}: {} is owned by {}", self.target, self.file, owner),
            None => write!(f, "{}: {} exists in filesystem", self.target, self.file),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum Error {
    /// Caller lacks the privileges a mutating operation needs
    #[error("permission denied: {0}")]
    PermissionError(String),

    /// Targets absent from every queried source
    #[error("target not found: {}", .0.join(", "))]
    NotFoundError(Vec<String>),

    /// Backend reported missing dependencies after resolution
    #[error("unsatisfied dependencies: {}", join(.0))]
    UnsatisfiedDependenciesError(Vec<MissingDependency>),

    /// Target files collide with files already on the system
    #[error("file conflicts: {}", join(.0))]
    FileConflictError(Vec<FileConflict>),

    /// Two targets are mutually exclusive
    #[error("conflicting dependencies: {0}")]
    ConflictingDependenciesError(String),

    /// The effective change set is empty
    #[error("nothing to be done")]
    NothingToBeDoneError,

    /// The build tool exited unsuccessfully
    #[error("failed to build {package}: {message}")]
    BuildError {
        package: String,
        status: Option<i32>,
        message: String,
    },

    /// Another transaction holds the database lock
    #[error("database is locked: {0}")]
    LockedError(String),

    /// Operation abandoned on request
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A backend command exited with a non-zero status
    #[error("{command} failed with status {status:?}: {stderr}")]
    BackendError {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Network request or HTTP failure
    #[error("download error: {0}")]
    DownloadError(String),

    /// Malformed data from a collaborator
    #[error("parse error: {0}")]
    ParseError(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Operation called in the wrong transaction state
    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a single missing name
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFoundError(vec![name.into()])
    }

    /// Names carried by a `NotFoundError`, empty for every other kind
    pub fn missing_targets(&self) -> &[String] {
        match self {
            Self::NotFoundError(names) => names,
            _ => &[],
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFoundError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_every_name() {
        let err = Error::NotFoundError(vec!["foo".to_string(), "bar".to_string()]);
        assert_eq!(err.to_string(), "target not found: foo, bar");
        assert_eq!(err.missing_targets(), ["foo", "bar"]);
    }

    #[test]
    fn test_file_conflict_display() {
        let owned = FileConflict {
            target: "foo".to_string(),
            file: "/usr/bin/foo".to_string(),
            owner: Some("bar".to_string()),
        };
        let loose = FileConflict {
            owner: None,
            ..owned.clone()
        };
        assert_eq!(owned.to_string(), "foo: /usr/bin/foo is owned by bar");
        assert_eq!(loose.to_string(), "foo: /usr/bin/foo exists in filesystem");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(!err.is_not_found());
    }
}
