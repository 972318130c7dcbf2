//! Version-control error types.

use std::io;
use thiserror::Error;

/// Errors from version-control backends.
#[derive(Debug, Error)]
pub enum VcsError {
    /// libgit2 failure.
    #[error("git2: {0}")]
    Git2(#[from] git2::Error),

    /// A historical path/revision pair could not be resolved.
    #[error("invalid revision: path={path} revision={revision}")]
    InvalidRevision { path: String, revision: String },

    /// Path is not below the repository root.
    #[error("path is outside the repository: {0}")]
    OutsideRepository(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VcsError {
    /// Create an InvalidRevision error.
    pub fn invalid_revision(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self::InvalidRevision {
            path: path.into(),
            revision: revision.into(),
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Version-control result type.
pub type VcsResult<T> = Result<T, VcsError>;
