//! Core node and permission types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Permission name → granted flag.
pub type PermissionSet = BTreeMap<String, bool>;

/// Permission to read content, metadata and permissions.
pub const READ: &str = "read";
/// Permission to create children, update and delete.
pub const WRITE: &str = "write";
/// Permission to change a node's owner.
pub const CHOWN: &str = "chown";
/// Permission to change a node's permissions.
pub const CHMOD: &str = "chmod";

/// Build a [`PermissionSet`] from `(name, value)` pairs.
pub fn permission_set<'a>(pairs: impl IntoIterator<Item = (&'a str, bool)>) -> PermissionSet {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Valid path with nothing on disk.
    Virtual,
}

impl NodeKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    /// Returns true if nothing exists at the path.
    pub fn is_virtual(&self) -> bool {
        matches!(self, NodeKind::Virtual)
    }

    /// Classify an on-disk entry. `None` for symlinks, sockets and the like.
    pub fn from_file_type(file_type: std::fs::FileType) -> Option<Self> {
        if file_type.is_dir() {
            Some(NodeKind::Directory)
        } else if file_type.is_file() {
            Some(NodeKind::File)
        } else {
            None
        }
    }
}
