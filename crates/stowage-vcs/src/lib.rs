//! # stowage-vcs
//!
//! Version-control collaborators for stowage workspaces.
//!
//! - [`VersionControl`] - Backend trait (stage, commit, roll back, read history)
//! - [`NoopBackend`] - Default pass-through backend, no durability
//! - [`GitBackend`] - libgit2 repository per workspace
//! - [`VcsHandle`] - Reentrant transaction wrapper; only the outermost
//!   transaction commits
//!
//! Paths handed to a backend are absolute and must live below the root the
//! backend was opened with.

mod error;
mod git;
mod noop;
mod transaction;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use error::{VcsError, VcsResult};
pub use git::{GitBackend, KEEP_FILE};
pub use noop::NoopBackend;
pub use transaction::VcsHandle;

/// Historical content of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// Raw (still encoded) file bytes.
    File(Vec<u8>),
    /// Entry names of a directory.
    Directory(Vec<String>),
}

/// Version-control backend.
pub trait VersionControl: Send + Sync + std::fmt::Debug {
    /// Names the backend needs left alone by user operations.
    fn reserved_names(&self) -> &'static [&'static str];

    /// Marker file that makes empty directories representable, if any.
    fn placeholder_name(&self) -> Option<&'static str>;

    /// Create the repository.
    fn init(&self) -> VcsResult<()>;

    /// Stage files (or whole directories).
    fn add(&self, paths: &[PathBuf]) -> VcsResult<()>;

    /// Unstage paths that were removed from the working tree.
    fn remove(&self, paths: &[PathBuf], directory: bool) -> VcsResult<()>;

    /// Commit everything staged.
    fn commit(&self, message: &str) -> VcsResult<()>;

    /// Reset the working tree to the last commit.
    fn rollback(&self) -> VcsResult<()>;

    /// Contents of `path` at `revision`.
    fn read(&self, path: &Path, revision: &str) -> VcsResult<Snapshot>;

    /// Revision ids that changed `path`, newest first.
    fn revisions(&self, path: &Path) -> VcsResult<Vec<String>>;
}

/// Which backend a workspace uses.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// No history.
    #[default]
    None,
    /// libgit2 repository.
    Git,
}

impl BackendKind {
    /// Construct the backend for a repository rooted at `root`.
    pub fn backend(self, root: impl Into<PathBuf>) -> Box<dyn VersionControl> {
        match self {
            BackendKind::None => Box::new(NoopBackend),
            BackendKind::Git => Box::new(GitBackend::new(root)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_backend_kind_strings() {
        assert_eq!(BackendKind::from_str("git").unwrap(), BackendKind::Git);
        assert_eq!(BackendKind::None.to_string(), "none");
        assert_eq!(BackendKind::default(), BackendKind::None);
    }

    #[test]
    fn test_backend_kind_selects_backend() {
        assert_eq!(BackendKind::None.backend("/tmp").placeholder_name(), None);
        assert_eq!(BackendKind::Git.backend("/tmp").placeholder_name(), Some(".keep"));
    }
}
