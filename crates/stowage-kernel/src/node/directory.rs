//! Directories.
//!
//! Bulk operations (delete, recursive touch, chown and permission changes)
//! visit every child under its own lock and keep going past permission
//! failures. The failures are reported together once the pass is done.

use std::path::PathBuf;

use stowage_vcs::Snapshot;

use super::{
    FileNode, Node, NodeBase, StoreNode, VirtualNode, check_target, claim_target, collect_denial,
    lock_for_copy, lock_for_move, raise_denials, touch_file,
};
use crate::error::{StoreError, StoreResult};
use crate::path;
use crate::pipeline::{self, LockScope, Operation};
use crate::types::{NodeKind, PermissionSet, WRITE};
use crate::user::Identifier;
use crate::workspace::Workspace;

/// Handle on a directory.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    base: NodeBase,
}

impl StoreNode for DirectoryNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
}

impl DirectoryNode {
    pub(crate) fn new(workspace: Workspace, path: &str) -> Self {
        Self {
            base: NodeBase::new(workspace, path, NodeKind::Directory),
        }
    }

    pub(crate) fn from_base(base: NodeBase) -> Self {
        Self {
            base: base.with_kind(NodeKind::Directory),
        }
    }

    /// See [`FileNode::with_initial_owner`].
    pub fn with_initial_owner(mut self, owner: impl Into<Identifier>) -> StoreResult<Self> {
        self.base.set_initial_owner(owner.into())?;
        Ok(self)
    }

    /// See [`FileNode::with_initial_permission`].
    pub fn with_initial_permission(mut self, permission: PermissionSet) -> StoreResult<Self> {
        self.base.set_initial_permission(permission)?;
        Ok(self)
    }

    /// Create the directory. Requires `write` on the parent.
    pub fn create(&self) -> StoreResult<DirectoryNode> {
        let base = &self.base;
        pipeline::run(base, Operation::Create, || {
            base.workspace()
                .transaction(&base.message(Operation::Create), || self.create_core())?;
            Ok(self.clone())
        })
    }

    fn create_core(&self) -> StoreResult<()> {
        let base = &self.base;
        std::fs::create_dir_all(base.storage_path())?;
        self.refresh_placeholder()?;
        base.metadata_sidecar().create(0)?;
        base.permission_sidecar().create()?;
        tracing::debug!(path = %base.path(), "directory created");
        Ok(())
    }

    /// Child names without reserved entries, sorted.
    pub fn read(&self) -> StoreResult<Vec<String>> {
        pipeline::run(&self.base, Operation::Read, || self.entry_names())
    }

    /// Child names at `revision`.
    pub fn read_revision(&self, revision: &str) -> StoreResult<Vec<String>> {
        let base = &self.base;
        pipeline::run(base, Operation::ReadRevision, || {
            match base.workspace().vcs().read(&base.storage_path(), revision)? {
                Snapshot::Directory(names) => Ok(self.visible(names)),
                Snapshot::File(_) => Err(StoreError::InvalidRevision {
                    path: base.path().to_string(),
                    revision: revision.to_string(),
                }),
            }
        })
    }

    /// Directories have no content to replace.
    pub fn update(&self) -> StoreResult<()> {
        Err(StoreError::invalid_argument(format!(
            "can't update directory {}",
            self.base.path()
        )))
    }

    /// Delete the directory and everything below it.
    ///
    /// Children the user may not delete are skipped. If any were skipped
    /// the directory stays and [`StoreError::PermissionDeniedMany`] lists
    /// them; the children that were deleted stay deleted unless the
    /// backend rolls the transaction back.
    pub fn delete(&self) -> StoreResult<()> {
        self.delete_scoped(LockScope::Chain)
    }

    pub(crate) fn delete_scoped(&self, scope: LockScope) -> StoreResult<()> {
        let base = &self.base;
        pipeline::run_scoped(base, Operation::Delete, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::Delete), || {
                    self.for_each_child(|child| match child {
                        Node::File(file) => file.delete_scoped(LockScope::Node),
                        Node::Directory(dir) => dir.delete_scoped(LockScope::Node),
                        Node::Virtual(_) => Ok(()),
                    })?;
                    base.metadata_sidecar().delete()?;
                    base.permission_sidecar().delete()?;
                    let storage = base.storage_path();
                    std::fs::remove_dir_all(&storage)?;
                    base.workspace().unstage(&[storage], true)?;
                    tracing::debug!(path = %base.path(), "directory deleted");
                    Ok(())
                })
        })
    }

    /// Refresh `updated_at`, optionally for the whole subtree.
    pub fn touch(&self, recursive: bool) -> StoreResult<()> {
        self.touch_scoped(recursive, LockScope::Chain)
    }

    pub(crate) fn touch_scoped(&self, recursive: bool, scope: LockScope) -> StoreResult<()> {
        let base = &self.base;
        pipeline::run_scoped(base, Operation::Touch, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::Touch), || {
                    self.touch_core()?;
                    if recursive {
                        self.for_each_child(|child| match child {
                            Node::File(file) => file.touch_scoped(LockScope::Node),
                            Node::Directory(dir) => dir.touch_scoped(true, LockScope::Node),
                            Node::Virtual(_) => Ok(()),
                        })?;
                    }
                    Ok(())
                })
        })
    }

    /// Touch this directory without locking or authorization.
    fn touch_core(&self) -> StoreResult<()> {
        let base = &self.base;
        self.refresh_placeholder()?;
        base.metadata_sidecar().touch()?;
        base.workspace().stage(&[base.permission_path()])
    }

    /// Touch the whole subtree without locking or authorization.
    fn touch_tree(&self) -> StoreResult<()> {
        self.touch_core()?;
        for child in self.children()? {
            match child {
                Node::File(file) => file.touch_core()?,
                Node::Directory(dir) => dir.touch_tree()?,
                Node::Virtual(_) => {}
            }
        }
        Ok(())
    }

    /// Copy the directory and its contents to `dest`.
    ///
    /// An existing directory receives the copy under this directory's
    /// name, which must not exist there yet; an existing file is an
    /// [`StoreError::InvalidNodeType`]. Children that can't be copied are
    /// skipped and reported together.
    pub fn copy(&self, dest: &str) -> StoreResult<DirectoryNode> {
        let base = &self.base;
        let mut locks = lock_for_copy(base, dest)?;
        pipeline::check(base, Operation::Copy)?;
        let target = self.resolve_dest(dest)?;
        check_target(base, &target.base)?;
        pipeline::check(&target.base, Operation::Create)?;
        claim_target(&mut locks, &target.base)?;

        let message = format!("copy {} to {}", base.path(), target.path());
        base.workspace().transaction(&message, || {
            target.create_core()?;
            self.copy_children(&target)
        })?;
        Ok(target)
    }

    /// Copy every child into the freshly created `target`.
    ///
    /// Runs under the locks of the top-level copy: the source subtree is
    /// held shared through its root, the target is new.
    fn copy_children(&self, target: &DirectoryNode) -> StoreResult<()> {
        self.for_each_child(|child| {
            pipeline::check(child.base(), Operation::Copy)?;
            let name = path::basename(child.path());
            match child {
                Node::File(file) => {
                    let dest = target.file(name);
                    pipeline::check(dest.base(), Operation::Create)?;
                    dest.create_core(&file.read_core()?)
                }
                Node::Directory(dir) => {
                    let dest = target.directory(name);
                    pipeline::check(dest.base(), Operation::Create)?;
                    dest.create_core()?;
                    dir.copy_children(&dest)
                }
                Node::Virtual(_) => Ok(()),
            }
        })
    }

    /// Move the directory and its contents to `dest`, resolved like
    /// [`copy`](Self::copy).
    ///
    /// Requires `write` here and on the destination directory.
    pub fn move_to(&self, dest: &str) -> StoreResult<DirectoryNode> {
        let base = &self.base;
        let _locks = lock_for_move(base, dest)?;
        pipeline::check(base, Operation::Move)?;
        let target = self.resolve_dest(dest)?;
        check_target(base, &target.base)?;
        if let Some(parent) = target.base.parent_base() {
            parent.authorize(WRITE)?;
        }

        let message = format!("move {} to {}", base.path(), target.path());
        base.workspace().transaction(&message, || self.move_core(&target))?;
        Ok(target)
    }

    /// The target is absent and its parent held exclusively, so it is not
    /// locked itself: its sidecar directory must not exist before the rename.
    fn move_core(&self, target: &DirectoryNode) -> StoreResult<()> {
        let base = &self.base;
        let target_base = &target.base;

        let record = base.metadata_sidecar().data()?.clone();
        let usage = record.disk_usage();
        let count = record.tree_file_count() + 1;

        let sources = sidecar_roots(base);
        let destinations = sidecar_roots(target_base);
        for (from, to) in sources.iter().zip(&destinations) {
            if let Some(dir) = to.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::rename(from, to)?;
        }

        target.touch_tree()?;
        if let Some(parent) = target_base.parent_base() {
            parent.metadata_sidecar().update(usage, 1, count, true)?;
        }
        base.metadata_sidecar().update_parent(-usage, -1, -count)?;
        base.workspace().unstage(&sources, true)?;

        tracing::debug!(from = %base.path(), to = %target.path(), "directory moved");
        Ok(())
    }

    /// Record `owner` as the owner, optionally for the whole subtree.
    pub fn chown(&self, owner: impl Into<Identifier>, recursive: bool) -> StoreResult<()> {
        self.chown_scoped(&owner.into(), recursive, LockScope::Node)
    }

    pub(crate) fn chown_scoped(
        &self,
        owner: &Identifier,
        recursive: bool,
        scope: LockScope,
    ) -> StoreResult<()> {
        let base = &self.base;
        owner.validate(base.workspace().config())?;
        pipeline::run_scoped(base, Operation::Chown, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::Chown), || {
                    base.metadata_sidecar().set_owner(owner.clone())?;
                    if recursive {
                        self.for_each_child(|child| match child {
                            Node::File(file) => file.chown_scoped(owner, LockScope::Node),
                            Node::Directory(dir) => dir.chown_scoped(owner, true, LockScope::Node),
                            Node::Virtual(_) => Ok(()),
                        })?;
                    }
                    Ok(())
                })
        })
    }

    /// Merge `values` into the entry of `identifier`, optionally for the
    /// whole subtree.
    pub fn set_permission(
        &self,
        identifier: impl Into<Identifier>,
        values: &PermissionSet,
        recursive: bool,
    ) -> StoreResult<()> {
        self.set_permission_scoped(&identifier.into(), values, recursive, LockScope::Node)
    }

    pub(crate) fn set_permission_scoped(
        &self,
        identifier: &Identifier,
        values: &PermissionSet,
        recursive: bool,
        scope: LockScope,
    ) -> StoreResult<()> {
        let base = &self.base;
        identifier.validate(base.workspace().config())?;
        pipeline::run_scoped(base, Operation::SetPermission, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::SetPermission), || {
                    base.permission_sidecar().set(identifier, values)?;
                    if recursive {
                        self.for_each_child(|child| match child {
                            Node::File(file) => {
                                file.set_permission_scoped(identifier, values, LockScope::Node)
                            }
                            Node::Directory(dir) => {
                                dir.set_permission_scoped(identifier, values, true, LockScope::Node)
                            }
                            Node::Virtual(_) => Ok(()),
                        })?;
                    }
                    Ok(())
                })
        })
    }

    /// Drop `names` from the entry of `identifier`, optionally for the
    /// whole subtree.
    pub fn unset_permission<S: AsRef<str>>(
        &self,
        identifier: impl Into<Identifier>,
        names: &[S],
        recursive: bool,
    ) -> StoreResult<()> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.unset_permission_scoped(&identifier.into(), &names, recursive, LockScope::Node)
    }

    pub(crate) fn unset_permission_scoped(
        &self,
        identifier: &Identifier,
        names: &[String],
        recursive: bool,
        scope: LockScope,
    ) -> StoreResult<()> {
        let base = &self.base;
        identifier.validate(base.workspace().config())?;
        pipeline::run_scoped(base, Operation::UnsetPermission, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::UnsetPermission), || {
                    base.permission_sidecar().unset(identifier, names)?;
                    if recursive {
                        self.for_each_child(|child| match child {
                            Node::File(file) => {
                                file.unset_permission_scoped(identifier, names, LockScope::Node)
                            }
                            Node::Directory(dir) => {
                                dir.unset_permission_scoped(identifier, names, true, LockScope::Node)
                            }
                            Node::Virtual(_) => Ok(()),
                        })?;
                    }
                    Ok(())
                })
        })
    }

    /// Typed node at `relative` below this directory.
    ///
    /// `..` never leaves the workspace root.
    pub fn find_object(&self, relative: &str) -> StoreResult<Node> {
        let workspace = self.base.workspace().clone();
        let path = path::join(self.base.path(), relative, false);
        let candidate = NodeBase::new(workspace.clone(), &path, NodeKind::Virtual);
        Ok(match candidate.kind_on_disk()? {
            NodeKind::File => Node::File(FileNode::new(workspace, &path)),
            NodeKind::Directory => Node::Directory(DirectoryNode::new(workspace, &path)),
            NodeKind::Virtual => Node::Virtual(VirtualNode::new(workspace, &path)),
        })
    }

    /// Directory handle at `relative`, whether or not it exists.
    pub fn directory(&self, relative: &str) -> DirectoryNode {
        let path = path::join(self.base.path(), relative, true);
        DirectoryNode::new(self.base.workspace().clone(), &path)
    }

    /// File handle at `relative`, whether or not it exists.
    pub fn file(&self, relative: &str) -> FileNode {
        let path = path::join(self.base.path(), relative, false);
        FileNode::new(self.base.workspace().clone(), &path)
    }

    /// Immediate children, reserved names excluded, sorted by name.
    pub fn children(&self) -> StoreResult<Vec<Node>> {
        self.entry_names()?
            .iter()
            .map(|name| self.find_object(name))
            .collect()
    }

    /// Number of immediate children.
    pub fn directory_file_count(&self) -> StoreResult<i64> {
        Ok(self.metadata()?.directory_file_count())
    }

    /// Number of descendants.
    pub fn tree_file_count(&self) -> StoreResult<i64> {
        Ok(self.metadata()?.tree_file_count())
    }

    fn entry_names(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.base.storage_path())? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(self.visible(names))
    }

    fn visible(&self, mut names: Vec<String>) -> Vec<String> {
        let workspace = self.base.workspace();
        names.retain(|name| !workspace.is_reserved_name(name));
        names.sort();
        names
    }

    /// Run `f` on every child, collecting permission failures.
    fn for_each_child(&self, mut f: impl FnMut(&Node) -> StoreResult<()>) -> StoreResult<()> {
        let mut denials = Vec::new();
        for child in self.children()? {
            collect_denial(f(&child), &mut denials)?;
        }
        raise_denials(denials)
    }

    /// Write and stage the backend's empty-directory marker, if it has one.
    fn refresh_placeholder(&self) -> StoreResult<()> {
        let workspace = self.base.workspace();
        let Some(name) = workspace.vcs().backend().placeholder_name() else {
            return Ok(());
        };
        let placeholder = self.base.storage_path().join(name);
        touch_file(&placeholder)?;
        workspace.stage(&[placeholder])
    }

    /// Where a copy or move to `dest` lands.
    fn resolve_dest(&self, dest: &str) -> StoreResult<DirectoryNode> {
        let workspace = self.base.workspace();
        match workspace.find_object(dest)? {
            Node::File(file) => Err(StoreError::InvalidNodeType {
                src: self.base.path().to_string(),
                src_kind: NodeKind::Directory,
                dest: file.path().to_string(),
                dest_kind: NodeKind::File,
            }),
            Node::Directory(dir) => {
                let name = path::basename(self.base.path());
                let existing = dir.find_object(name)?;
                if !existing.is_virtual() {
                    return Err(StoreError::invalid_path(format!(
                        "object already exists: {}",
                        existing.path()
                    )));
                }
                Ok(dir.directory(name))
            }
            Node::Virtual(_) => Ok(workspace.directory(dest)),
        }
    }
}

/// Content directory plus both sidecar directories of a directory node.
fn sidecar_roots(base: &NodeBase) -> [PathBuf; 3] {
    let parent_of = |file: PathBuf| file.parent().map(PathBuf::from).unwrap_or(file);
    [
        base.storage_path(),
        parent_of(base.metadata_path()),
        parent_of(base.permission_path()),
    ]
}
