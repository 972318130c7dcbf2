//! Node handles.
//!
//! - [`FileNode`] - Regular file: body, history, copy/move
//! - [`DirectoryNode`] - Directory: traversal, recursive operations
//! - [`VirtualNode`] - Valid path with nothing on disk
//! - [`Node`] - Whichever of the three a lookup found
//! - [`StoreNode`] - Operations every kind shares
//!
//! Handles are plain values (workspace + normalized path) and can be
//! rebuilt at will. The data lives in the content tree and in the two
//! sidecar trees, keyed by the node path.

mod directory;
mod file;
mod virtual_node;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use directory::DirectoryNode;
pub use file::FileNode;
pub use virtual_node::VirtualNode;

use crate::error::{Denial, StoreError, StoreResult};
use crate::lock::{LockMode, LockSet, LockTarget, Provision};
use crate::metadata::{Metadata, MetadataRecord};
use crate::path;
use crate::permission::{Permission, PermissionRecord};
use crate::pipeline::{self, LockScope, Operation};
use crate::types::{CHMOD, CHOWN, NodeKind, PermissionSet};
use crate::user::Identifier;
use crate::workspace::Workspace;

/// State shared by every node kind.
#[derive(Debug, Clone)]
pub struct NodeBase {
    workspace: Workspace,
    path: String,
    kind: NodeKind,
    initial_owner: Option<Identifier>,
    initial_permission: Option<PermissionSet>,
}

impl NodeBase {
    pub(crate) fn new(workspace: Workspace, path: &str, kind: NodeKind) -> Self {
        Self {
            path: path::normalize(path, kind.is_dir()),
            workspace,
            kind,
            initial_owner: None,
            initial_permission: None,
        }
    }

    /// Same path, handled as `kind`.
    pub(crate) fn with_kind(&self, kind: NodeKind) -> Self {
        Self::new(self.workspace.clone(), &self.path, kind)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Normalized absolute path; directories end in `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Kind of the handle (not necessarily what is on disk).
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    pub(crate) fn is_dir_path(&self) -> bool {
        self.kind.is_dir()
    }

    /// True if anything exists at the path.
    pub fn exists(&self) -> bool {
        std::fs::symlink_metadata(self.storage_path()).is_ok()
    }

    /// What the content tree holds at this path.
    pub fn kind_on_disk(&self) -> StoreResult<NodeKind> {
        match std::fs::symlink_metadata(self.storage_path()) {
            Ok(meta) => NodeKind::from_file_type(meta.file_type())
                .ok_or_else(|| StoreError::UnsupportedFileType(self.path.clone())),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(NodeKind::Virtual)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Content path on disk.
    pub fn storage_path(&self) -> PathBuf {
        let relative = path::relative(&self.path).trim_end_matches('/');
        let root = self.workspace.storage_dir();
        if relative.is_empty() {
            root
        } else {
            root.join(relative)
        }
    }

    fn sidecar_path(&self, tree: PathBuf, extension: &str) -> PathBuf {
        tree.join(format!("{}{}", path::relative(&self.path), extension))
    }

    /// `<metadata tree><path>.meta`; for directories `<dir>/.meta`.
    pub fn metadata_path(&self) -> PathBuf {
        let config = self.workspace.config();
        self.sidecar_path(self.workspace.metadata_dir(), &config.metadata_extension)
    }

    /// `<permission tree><path>.perm`; for directories `<dir>/.perm`.
    pub fn permission_path(&self) -> PathBuf {
        let config = self.workspace.config();
        self.sidecar_path(self.workspace.permission_dir(), &config.permission_extension)
    }

    /// Advisory lock file next to the metadata sidecar.
    pub(crate) fn lock_path(&self) -> PathBuf {
        let mut path = self.metadata_path().into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Lock on this node, taken only if the node exists or was locked before.
    pub(crate) fn lock_target(&self, mode: LockMode) -> LockTarget {
        LockTarget {
            lock_file: self.lock_path(),
            node_path: self.path.clone(),
            mode,
            provision: Provision::WhileExists(self.storage_path()),
        }
    }

    pub(crate) fn parent_base(&self) -> Option<NodeBase> {
        path::parent(&self.path)
            .map(|parent| NodeBase::new(self.workspace.clone(), &parent, NodeKind::Directory))
    }

    /// Ancestor directories, root first.
    pub(crate) fn ancestors(&self) -> Vec<NodeBase> {
        let mut chain = path::chain(&self.path);
        chain.pop();
        chain
            .iter()
            .map(|p| NodeBase::new(self.workspace.clone(), p, NodeKind::Directory))
            .collect()
    }

    pub(crate) fn metadata_sidecar(&self) -> Metadata {
        Metadata::new(self)
    }

    pub(crate) fn permission_sidecar(&self) -> Permission {
        Permission::new(self)
    }

    /// Owner recorded when this node is created.
    pub(crate) fn initial_owner(&self) -> Identifier {
        self.initial_owner
            .clone()
            .unwrap_or_else(|| self.workspace.user().identifier().clone())
    }

    /// Permissions granted to the creator when this node is created.
    pub(crate) fn initial_permission(&self) -> PermissionSet {
        self.initial_permission
            .clone()
            .unwrap_or_else(|| self.workspace.config().default_owner_permission.clone())
    }

    /// Override the creation owner. Requires `chown` on the parent.
    pub(crate) fn set_initial_owner(&mut self, owner: Identifier) -> StoreResult<()> {
        owner.validate(self.workspace.config())?;
        self.creation_authority().authorize(CHOWN)?;
        self.initial_owner = Some(owner);
        Ok(())
    }

    /// Override the creator's permissions. Requires `chmod` on the parent.
    pub(crate) fn set_initial_permission(&mut self, permission: PermissionSet) -> StoreResult<()> {
        self.creation_authority().authorize(CHMOD)?;
        self.initial_permission = Some(permission);
        Ok(())
    }

    fn creation_authority(&self) -> NodeBase {
        self.parent_base().unwrap_or_else(|| self.clone())
    }

    pub(crate) fn denial(&self, permission: &str) -> Denial {
        Denial {
            identifiers: self.workspace.user().identifiers().to_vec(),
            namespace: self.workspace.namespace().to_string(),
            permission: permission.to_string(),
            path: self.path.clone(),
        }
    }

    /// Fail with [`StoreError::PermissionDenied`] unless the acting user
    /// holds `permission` here.
    pub(crate) fn authorize(&self, permission: &str) -> StoreResult<()> {
        if self.permission_sidecar().allow(permission)? {
            return Ok(());
        }
        let denial = self.denial(permission);
        tracing::debug!(%denial, "permission denied");
        Err(StoreError::PermissionDenied(denial))
    }

    /// Commit message subject for `op`.
    pub(crate) fn message(&self, op: Operation) -> String {
        format!("{} {}", op, self.path)
    }
}

/// Operations shared by every node kind.
pub trait StoreNode {
    fn base(&self) -> &NodeBase;

    fn path(&self) -> &str {
        self.base().path()
    }

    fn workspace(&self) -> &Workspace {
        self.base().workspace()
    }

    fn is_root(&self) -> bool {
        self.base().is_root()
    }

    fn exists(&self) -> bool {
        self.base().exists()
    }

    /// On-disk kind at this path.
    fn filetype(&self) -> StoreResult<NodeKind> {
        self.base().kind_on_disk()
    }

    /// `None` for the root.
    fn parent_directory(&self) -> Option<DirectoryNode> {
        self.base().parent_base().map(DirectoryNode::from_base)
    }

    /// Metadata record. Requires `read`.
    fn metadata(&self) -> StoreResult<MetadataRecord> {
        let base = self.base();
        pipeline::run(base, Operation::GetMetadata, || {
            Ok(base.metadata_sidecar().data()?.clone())
        })
    }

    /// Permission record. Requires `read`.
    fn permissions(&self) -> StoreResult<PermissionRecord> {
        let base = self.base();
        pipeline::run(base, Operation::GetPermissions, || {
            Ok(base.permission_sidecar().data()?.clone())
        })
    }

    /// Usage charged to the parent: content length for files, unit plus
    /// subtree for directories.
    fn disk_usage(&self) -> StoreResult<i64> {
        Ok(self.metadata()?.disk_usage())
    }

    /// Revisions that changed this path, newest first.
    fn revisions(&self) -> StoreResult<Vec<String>> {
        let base = self.base();
        pipeline::run(base, Operation::ReadRevision, || {
            Ok(base.workspace().vcs().revisions(&base.storage_path())?)
        })
    }
}

/// A node of whatever kind a lookup found.
#[derive(Debug, Clone)]
pub enum Node {
    File(FileNode),
    Directory(DirectoryNode),
    Virtual(VirtualNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.base().kind()
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Node::Virtual(_))
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn into_file(self) -> Option<FileNode> {
        match self {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn into_directory(self) -> Option<DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    fn not_a_directory(&self) -> StoreError {
        StoreError::invalid_argument(format!("{} is not a directory", self.path()))
    }

    /// See [`DirectoryNode::find_object`]; an error on other kinds.
    pub fn find_object(&self, relative: &str) -> StoreResult<Node> {
        match self {
            Node::Directory(dir) => dir.find_object(relative),
            _ => Err(self.not_a_directory()),
        }
    }

    /// See [`DirectoryNode::directory`]; an error on other kinds.
    pub fn directory(&self, relative: &str) -> StoreResult<DirectoryNode> {
        match self {
            Node::Directory(dir) => Ok(dir.directory(relative)),
            _ => Err(self.not_a_directory()),
        }
    }

    /// See [`DirectoryNode::file`]; an error on other kinds.
    pub fn file(&self, relative: &str) -> StoreResult<FileNode> {
        match self {
            Node::Directory(dir) => Ok(dir.file(relative)),
            _ => Err(self.not_a_directory()),
        }
    }

    /// Children of a directory; files and virtual nodes have none.
    pub fn children(&self) -> StoreResult<Vec<Node>> {
        match self {
            Node::Directory(dir) => dir.children(),
            _ => Ok(Vec::new()),
        }
    }

    /// Delete whatever this is. Virtual nodes fail validation.
    pub fn delete(&self) -> StoreResult<()> {
        match self {
            Node::File(file) => file.delete(),
            Node::Directory(dir) => dir.delete(),
            Node::Virtual(node) => Err(StoreError::invalid_path(format!(
                "object not found: {}",
                node.path()
            ))),
        }
    }

    /// Copy to `dest`, see [`FileNode::copy`] and [`DirectoryNode::copy`].
    pub fn copy(&self, dest: &str) -> StoreResult<Node> {
        match self {
            Node::File(file) => file.copy(dest).map(Node::File),
            Node::Directory(dir) => dir.copy(dest).map(Node::Directory),
            Node::Virtual(node) => Err(StoreError::invalid_path(format!(
                "object not found: {}",
                node.path()
            ))),
        }
    }

    /// Move to `dest`, see [`FileNode::move_to`] and [`DirectoryNode::move_to`].
    pub fn move_to(&self, dest: &str) -> StoreResult<Node> {
        match self {
            Node::File(file) => file.move_to(dest).map(Node::File),
            Node::Directory(dir) => dir.move_to(dest).map(Node::Directory),
            Node::Virtual(node) => Err(StoreError::invalid_path(format!(
                "object not found: {}",
                node.path()
            ))),
        }
    }
}

impl StoreNode for Node {
    fn base(&self) -> &NodeBase {
        match self {
            Node::File(file) => file.base(),
            Node::Directory(dir) => dir.base(),
            Node::Virtual(node) => node.base(),
        }
    }
}

/// Exclusive locks for moving `source` to the user-given `dest`: both
/// chains in one ordered set.
pub(crate) fn lock_for_move(source: &NodeBase, dest: &str) -> StoreResult<LockSet> {
    let dest = peek_dest(source, dest)?;
    let mut targets = pipeline::lock_targets(source, LockMode::Exclusive, LockScope::Chain);
    targets.extend(pipeline::lock_targets(&dest, LockMode::Exclusive, LockScope::Chain));
    pipeline::lock(source.workspace(), targets)
}

/// Locks for copying `source` to the user-given `dest`: the source chain
/// shared, the destination chain exclusive, in one ordered set.
pub(crate) fn lock_for_copy(source: &NodeBase, dest: &str) -> StoreResult<LockSet> {
    let dest = peek_dest(source, dest)?;
    let mut targets = pipeline::lock_targets(source, LockMode::Shared, LockScope::Chain);
    targets.extend(pipeline::lock_targets(&dest, LockMode::Exclusive, LockScope::Chain));
    pipeline::lock(source.workspace(), targets)
}

/// The user-given destination, typed by what is on disk so that an
/// existing directory is locked through its own lock file.
fn peek_dest(source: &NodeBase, dest: &str) -> StoreResult<NodeBase> {
    let peek = NodeBase::new(source.workspace().clone(), dest, NodeKind::File);
    Ok(if peek.kind_on_disk()?.is_dir() {
        peek.with_kind(NodeKind::Directory)
    } else {
        peek
    })
}

/// Lock the resolved copy/move target itself, once it passed its checks.
pub(crate) fn claim_target(locks: &mut LockSet, target: &NodeBase) -> StoreResult<()> {
    let timeout = target.workspace().config().lock_timeout();
    locks.claim(&target.lock_target(LockMode::Exclusive).provisioned(), timeout)
}

/// Checks on a resolved copy/move target beyond those of the source.
pub(crate) fn check_target(source: &NodeBase, target: &NodeBase) -> StoreResult<()> {
    if target.path() == source.path() {
        return Err(StoreError::invalid_path(format!(
            "source and destination are the same: {}",
            source.path()
        )));
    }
    if source.is_dir_path() && target.path().starts_with(source.path()) {
        return Err(StoreError::invalid_path(format!(
            "can't place {} inside itself",
            source.path()
        )));
    }
    pipeline::validate_name(target)?;
    let parent = target
        .parent_base()
        .ok_or_else(|| StoreError::invalid_path("destination can't be the root"))?;
    if !parent.kind_on_disk()?.is_dir() {
        return Err(StoreError::invalid_path(format!(
            "parent directory not found: {}",
            target.path()
        )));
    }
    Ok(())
}

/// Bump the mtime of the file at `path`, creating it empty if missing.
pub(crate) fn touch_file(path: &Path) -> StoreResult<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}

/// Flatten permission failures of a bulk operation into `denials`; any
/// other error is returned.
pub(crate) fn collect_denial(result: StoreResult<()>, denials: &mut Vec<Denial>) -> StoreResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => match e.into_denials() {
            Ok(found) => {
                for denial in &found {
                    tracing::warn!(%denial, "skipped during bulk operation");
                }
                denials.extend(found);
                Ok(())
            }
            Err(other) => Err(other),
        },
    }
}

/// Raise the collected denials as one error, if any.
pub(crate) fn raise_denials(denials: Vec<Denial>) -> StoreResult<()> {
    if denials.is_empty() {
        Ok(())
    } else {
        Err(StoreError::PermissionDeniedMany(denials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::Store;

    fn workspace(dir: &std::path::Path) -> Workspace {
        let store = Store::new(StoreConfig::with_storage_root(dir)).unwrap();
        let user = store.user(["foo"]).unwrap();
        store.workspace(&user, "ws").unwrap()
    }

    #[test]
    fn test_sidecar_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let ns = dir.path().join("ws");

        let root = NodeBase::new(ws.clone(), "/", NodeKind::Directory);
        assert_eq!(root.storage_path(), ns.join("storage"));
        assert_eq!(root.metadata_path(), ns.join("metadata/.meta"));
        assert_eq!(root.lock_path(), ns.join("metadata/.meta.lock"));

        let sub = NodeBase::new(ws.clone(), "x", NodeKind::Directory);
        assert_eq!(sub.path(), "/x/");
        assert_eq!(sub.storage_path(), ns.join("storage/x"));
        assert_eq!(sub.metadata_path(), ns.join("metadata/x/.meta"));
        assert_eq!(sub.permission_path(), ns.join("permission/x/.perm"));

        let file = NodeBase::new(ws, "/x/f.txt", NodeKind::File);
        assert_eq!(file.metadata_path(), ns.join("metadata/x/f.txt.meta"));
        assert_eq!(file.lock_path(), ns.join("metadata/x/f.txt.meta.lock"));
    }

    #[test]
    fn test_ancestors_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let file = NodeBase::new(ws, "/a/b/f", NodeKind::File);
        let ancestors: Vec<String> = file
            .ancestors()
            .iter()
            .map(|a| a.path().to_string())
            .collect();
        assert_eq!(ancestors, vec!["/", "/a/", "/a/b/"]);
        assert_eq!(file.parent_base().unwrap().path(), "/a/b/");
        assert!(file.parent_base().unwrap().parent_base().unwrap().parent_base().unwrap().is_root());
    }

    #[test]
    fn test_collect_denial_keeps_other_errors() {
        let mut denials = Vec::new();
        let err = collect_denial(Err(StoreError::invalid_path("x")), &mut denials);
        assert!(err.is_err());
        assert!(denials.is_empty());
        assert!(raise_denials(denials).is_ok());
    }
}
