//! Store error types.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use stowage_codec::CodecError;
use stowage_vcs::VcsError;

use crate::lock::LockMode;
use crate::types::NodeKind;
use crate::user::Identifier;

/// One refused permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Identifier chain of the acting user.
    pub identifiers: Vec<Identifier>,
    /// Workspace namespace.
    pub namespace: String,
    /// Permission that was required.
    pub permission: String,
    /// Node path.
    pub path: String,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = serde_json::to_string(&self.identifiers).unwrap_or_default();
        write!(
            f,
            "user={} workspace={} permission={} object={}",
            user, self.namespace, self.permission, self.path
        )
    }
}

fn join_denials(denials: &[Denial]) -> String {
    denials
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Target missing, already present, root deletion, or reserved name.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A single operation was refused.
    #[error("permission denied: {0}")]
    PermissionDenied(Denial),

    /// Some children of a bulk operation were refused.
    #[error("permission denied: {}", join_denials(.0))]
    PermissionDeniedMany(Vec<Denial>),

    /// Copy/move destination has an incompatible kind.
    #[error("invalid node type: '{src}' is {src_kind}, '{dest}' is {dest_kind}")]
    InvalidNodeType {
        src: String,
        src_kind: NodeKind,
        dest: String,
        dest_kind: NodeKind,
    },

    /// Historical path/revision pair could not be resolved.
    #[error("invalid revision: path={path} revision={revision}")]
    InvalidRevision { path: String, revision: String },

    /// Advisory lock not acquired in time.
    #[error("timed out after {timeout:?} waiting for {mode} lock on {path}")]
    LockTimeout {
        path: String,
        mode: LockMode,
        timeout: Duration,
    },

    /// On-disk entry is neither a regular file nor a directory.
    #[error("unsupported file type at {0}")]
    UnsupportedFileType(String),

    /// Identifier violates the naming rules.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Operation not meaningful for this node.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Sidecar (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Content transform failure.
    #[error("transform error: {0}")]
    Codec(#[from] CodecError),

    /// Version-control failure.
    #[error("version control error: {0}")]
    Vcs(VcsError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification for callers that branch on error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StoreErrorKind {
    InvalidPath,
    PermissionDenied,
    InvalidNodeType,
    InvalidRevision,
    LockTimeout,
    InvalidArgument,
    Internal,
}

impl StoreError {
    /// Create an InvalidPath error.
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create an InvalidIdentifier error.
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            Self::InvalidPath(_) | Self::UnsupportedFileType(_) => StoreErrorKind::InvalidPath,
            Self::PermissionDenied(_) | Self::PermissionDeniedMany(_) => {
                StoreErrorKind::PermissionDenied
            }
            Self::InvalidNodeType { .. } => StoreErrorKind::InvalidNodeType,
            Self::InvalidRevision { .. } => StoreErrorKind::InvalidRevision,
            Self::LockTimeout { .. } => StoreErrorKind::LockTimeout,
            Self::InvalidIdentifier(_) | Self::InvalidArgument(_) => {
                StoreErrorKind::InvalidArgument
            }
            Self::Config(_) | Self::Json(_) | Self::Codec(_) | Self::Vcs(_) | Self::Io(_) => {
                StoreErrorKind::Internal
            }
        }
    }

    /// The individual denials behind a permission error, flattened.
    ///
    /// Any other error is handed back unchanged.
    pub fn into_denials(self) -> Result<Vec<Denial>, Self> {
        match self {
            Self::PermissionDenied(denial) => Ok(vec![denial]),
            Self::PermissionDeniedMany(denials) => Ok(denials),
            other => Err(other),
        }
    }

    /// Borrowing view of [`into_denials`](Self::into_denials).
    pub fn denials(&self) -> Vec<&Denial> {
        match self {
            Self::PermissionDenied(denial) => vec![denial],
            Self::PermissionDeniedMany(denials) => denials.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<VcsError> for StoreError {
    fn from(e: VcsError) -> Self {
        match e {
            VcsError::InvalidRevision { path, revision } => {
                Self::InvalidRevision { path, revision }
            }
            other => Self::Vcs(other),
        }
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn denial(path: &str) -> Denial {
        Denial {
            identifiers: vec![Identifier::from("bar")],
            namespace: "ws".into(),
            permission: "read".into(),
            path: path.into(),
        }
    }

    #[test]
    fn test_denial_message_names_everything() {
        let err = StoreError::PermissionDenied(denial("/x/f.txt"));
        let msg = err.to_string();
        assert!(msg.contains("bar"));
        assert!(msg.contains("permission=read"));
        assert!(msg.contains("object=/x/f.txt"));
        assert_eq!(err.kind(), StoreErrorKind::PermissionDenied);
    }

    #[test]
    fn test_aggregate_lists_each_denial() {
        let err = StoreError::PermissionDeniedMany(vec![denial("/a"), denial("/b")]);
        let msg = err.to_string();
        assert!(msg.contains("object=/a"));
        assert!(msg.contains("object=/b"));
        assert_eq!(err.denials().len(), 2);
        assert_eq!(err.into_denials().unwrap().len(), 2);
    }

    #[test]
    fn test_vcs_invalid_revision_maps_to_store_kind() {
        let err: StoreError = VcsError::invalid_revision("/p", "abc").into();
        assert!(matches!(err, StoreError::InvalidRevision { .. }));
        assert_eq!(err.kind(), StoreErrorKind::InvalidRevision);

        let err: StoreError = VcsError::other("x").into();
        assert_eq!(err.kind(), StoreErrorKind::Internal);
    }

    #[test]
    fn test_non_permission_errors_are_not_denials() {
        let err = StoreError::invalid_path("nope");
        assert!(err.denials().is_empty());
        assert!(err.into_denials().is_err());
    }
}
