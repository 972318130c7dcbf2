//! Regular files.

use stowage_vcs::Snapshot;

use super::{
    DirectoryNode, Node, NodeBase, StoreNode, check_target, claim_target, lock_for_copy,
    lock_for_move, touch_file,
};
use crate::error::{StoreError, StoreResult};
use crate::path;
use crate::pipeline::{self, LockScope, Operation};
use crate::types::{NodeKind, PermissionSet, WRITE};
use crate::user::Identifier;
use crate::workspace::Workspace;

/// Handle on a regular file.
#[derive(Debug, Clone)]
pub struct FileNode {
    base: NodeBase,
}

impl StoreNode for FileNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
}

impl FileNode {
    pub(crate) fn new(workspace: Workspace, path: &str) -> Self {
        Self {
            base: NodeBase::new(workspace, path, NodeKind::File),
        }
    }

    /// Record `owner` instead of the acting user when created.
    ///
    /// Requires `chown` on the parent directory.
    pub fn with_initial_owner(mut self, owner: impl Into<Identifier>) -> StoreResult<Self> {
        self.base.set_initial_owner(owner.into())?;
        Ok(self)
    }

    /// Grant the creator `permission` instead of the configured default.
    ///
    /// Requires `chmod` on the parent directory.
    pub fn with_initial_permission(mut self, permission: PermissionSet) -> StoreResult<Self> {
        self.base.set_initial_permission(permission)?;
        Ok(self)
    }

    /// Create the file with `body`. Requires `write` on the parent.
    pub fn create(&self, body: impl AsRef<[u8]>) -> StoreResult<()> {
        let base = &self.base;
        let body = body.as_ref();
        pipeline::run(base, Operation::Create, || {
            base.workspace()
                .transaction(&base.message(Operation::Create), || self.create_core(body))
        })
    }

    /// Create without locking or authorization.
    pub(crate) fn create_core(&self, body: &[u8]) -> StoreResult<()> {
        let base = &self.base;
        self.write_body(body)?;
        base.metadata_sidecar().create(body.len() as i64)?;
        base.permission_sidecar().create()?;
        tracing::debug!(path = %base.path(), bytes = body.len(), "file created");
        Ok(())
    }

    /// Decoded content.
    pub fn read(&self) -> StoreResult<Vec<u8>> {
        pipeline::run(&self.base, Operation::Read, || self.read_core())
    }

    pub(crate) fn read_core(&self) -> StoreResult<Vec<u8>> {
        let base = &self.base;
        let encoded = std::fs::read(base.storage_path())?;
        Ok(base.workspace().storage_transforms().decode(&encoded)?)
    }

    /// Decoded content at `revision`.
    pub fn read_revision(&self, revision: &str) -> StoreResult<Vec<u8>> {
        let base = &self.base;
        pipeline::run(base, Operation::ReadRevision, || {
            match base.workspace().vcs().read(&base.storage_path(), revision)? {
                Snapshot::File(encoded) => {
                    Ok(base.workspace().storage_transforms().decode(&encoded)?)
                }
                Snapshot::Directory(_) => Err(StoreError::InvalidRevision {
                    path: base.path().to_string(),
                    revision: revision.to_string(),
                }),
            }
        })
    }

    /// Replace the content. The size delta climbs to the root.
    pub fn update(&self, body: impl AsRef<[u8]>) -> StoreResult<()> {
        let base = &self.base;
        let body = body.as_ref();
        pipeline::run(base, Operation::Update, || {
            base.workspace()
                .transaction(&base.message(Operation::Update), || self.update_core(body))
        })
    }

    fn update_core(&self, body: &[u8]) -> StoreResult<()> {
        let base = &self.base;
        self.write_body(body)?;
        let mut metadata = base.metadata_sidecar();
        let delta = body.len() as i64 - metadata.disk_usage()?;
        metadata.update(delta, 0, 0, true)?;
        tracing::debug!(path = %base.path(), delta, "file updated");
        Ok(())
    }

    pub fn delete(&self) -> StoreResult<()> {
        self.delete_scoped(LockScope::Chain)
    }

    pub(crate) fn delete_scoped(&self, scope: LockScope) -> StoreResult<()> {
        let base = &self.base;
        pipeline::run_scoped(base, Operation::Delete, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::Delete), || {
                    let storage = base.storage_path();
                    std::fs::remove_file(&storage)?;
                    base.workspace().unstage(&[storage], false)?;
                    base.metadata_sidecar().delete()?;
                    base.permission_sidecar().delete()?;
                    tracing::debug!(path = %base.path(), "file deleted");
                    Ok(())
                })
        })
    }

    /// Refresh `updated_at` and the content mtime.
    pub fn touch(&self) -> StoreResult<()> {
        self.touch_scoped(LockScope::Chain)
    }

    pub(crate) fn touch_scoped(&self, scope: LockScope) -> StoreResult<()> {
        let base = &self.base;
        pipeline::run_scoped(base, Operation::Touch, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::Touch), || self.touch_core())
        })
    }

    /// Touch without locking or authorization.
    pub(crate) fn touch_core(&self) -> StoreResult<()> {
        let base = &self.base;
        let workspace = base.workspace();
        let storage = base.storage_path();
        touch_file(&storage)?;
        workspace.stage(&[storage])?;
        base.metadata_sidecar().touch()?;
        workspace.stage(&[base.permission_path()])
    }

    /// Copy to `dest`.
    ///
    /// An existing file at the destination is overwritten, an existing
    /// directory receives the file under its own name. Requires `read` here
    /// and whatever the resulting create or update requires there.
    pub fn copy(&self, dest: &str) -> StoreResult<FileNode> {
        let base = &self.base;
        let mut locks = lock_for_copy(base, dest)?;
        pipeline::check(base, Operation::Copy)?;
        let target = self.resolve_dest(dest)?;
        check_target(base, &target.base)?;
        let overwrite = target.exists();
        let op = if overwrite {
            Operation::Update
        } else {
            Operation::Create
        };
        pipeline::check(&target.base, op)?;
        claim_target(&mut locks, &target.base)?;

        let message = format!("copy {} to {}", base.path(), target.path());
        base.workspace().transaction(&message, || {
            let body = self.read_core()?;
            if overwrite {
                target.update_core(&body)
            } else {
                target.create_core(&body)
            }
        })?;
        Ok(target)
    }

    /// Move to `dest`, resolved like [`copy`](Self::copy).
    ///
    /// Requires `write` here and on the destination directory.
    pub fn move_to(&self, dest: &str) -> StoreResult<FileNode> {
        let base = &self.base;
        let mut locks = lock_for_move(base, dest)?;
        pipeline::check(base, Operation::Move)?;
        let target = self.resolve_dest(dest)?;
        check_target(base, &target.base)?;
        if let Some(parent) = target.base.parent_base() {
            parent.authorize(WRITE)?;
        }
        claim_target(&mut locks, &target.base)?;

        let message = format!("move {} to {}", base.path(), target.path());
        base.workspace().transaction(&message, || self.move_core(&target))?;
        Ok(target)
    }

    fn move_core(&self, target: &FileNode) -> StoreResult<()> {
        let base = &self.base;
        let workspace = base.workspace();
        let target_base = &target.base;

        let usage = base.metadata_sidecar().disk_usage()?;
        let (delta, count) = if target.exists() {
            (usage - target_base.metadata_sidecar().disk_usage()?, 0)
        } else {
            (usage, 1)
        };

        let sources = [
            base.storage_path(),
            base.metadata_path(),
            base.permission_path(),
        ];
        let destinations = [
            target_base.storage_path(),
            target_base.metadata_path(),
            target_base.permission_path(),
        ];
        for (from, to) in sources.iter().zip(&destinations) {
            if let Some(dir) = to.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::rename(from, to)?;
        }

        target.touch_core()?;
        if let Some(parent) = target_base.parent_base() {
            parent.metadata_sidecar().update(delta, count, count, true)?;
        }
        base.metadata_sidecar().update_parent(-usage, -1, -1)?;
        workspace.unstage(&sources, false)?;

        tracing::debug!(from = %base.path(), to = %target.path(), "file moved");
        Ok(())
    }

    /// Record `owner` as the owner. Requires `chown`.
    pub fn chown(&self, owner: impl Into<Identifier>) -> StoreResult<()> {
        self.chown_scoped(&owner.into(), LockScope::Node)
    }

    pub(crate) fn chown_scoped(&self, owner: &Identifier, scope: LockScope) -> StoreResult<()> {
        let base = &self.base;
        owner.validate(base.workspace().config())?;
        pipeline::run_scoped(base, Operation::Chown, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::Chown), || {
                    base.metadata_sidecar().set_owner(owner.clone())
                })
        })
    }

    /// Merge `values` into the entry of `identifier`. Requires `chmod`.
    pub fn set_permission(
        &self,
        identifier: impl Into<Identifier>,
        values: &PermissionSet,
    ) -> StoreResult<()> {
        self.set_permission_scoped(&identifier.into(), values, LockScope::Node)
    }

    pub(crate) fn set_permission_scoped(
        &self,
        identifier: &Identifier,
        values: &PermissionSet,
        scope: LockScope,
    ) -> StoreResult<()> {
        let base = &self.base;
        identifier.validate(base.workspace().config())?;
        pipeline::run_scoped(base, Operation::SetPermission, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::SetPermission), || {
                    base.permission_sidecar().set(identifier, values)
                })
        })
    }

    /// Drop `names` from the entry of `identifier`. Requires `chmod`.
    pub fn unset_permission<S: AsRef<str>>(
        &self,
        identifier: impl Into<Identifier>,
        names: &[S],
    ) -> StoreResult<()> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.unset_permission_scoped(&identifier.into(), &names, LockScope::Node)
    }

    pub(crate) fn unset_permission_scoped(
        &self,
        identifier: &Identifier,
        names: &[String],
        scope: LockScope,
    ) -> StoreResult<()> {
        let base = &self.base;
        identifier.validate(base.workspace().config())?;
        pipeline::run_scoped(base, Operation::UnsetPermission, scope, || {
            base.workspace()
                .transaction(&base.message(Operation::UnsetPermission), || {
                    base.permission_sidecar().unset(identifier, names)
                })
        })
    }

    /// Encode and write the content, then stage it.
    fn write_body(&self, body: &[u8]) -> StoreResult<()> {
        let workspace = self.base.workspace();
        let encoded = workspace.storage_transforms().encode(body)?;
        let storage = self.base.storage_path();
        std::fs::write(&storage, encoded)?;
        workspace.stage(&[storage])
    }

    /// Where a copy or move to `dest` lands.
    fn resolve_dest(&self, dest: &str) -> StoreResult<FileNode> {
        let workspace = self.base.workspace();
        match workspace.find_object(dest)? {
            Node::Directory(dir) => {
                let name = path::basename(self.base.path());
                match dir.find_object(name)? {
                    Node::Directory(existing) => Err(self.wrong_kind(&existing)),
                    _ => Ok(dir.file(name)),
                }
            }
            _ => Ok(workspace.file(dest)),
        }
    }

    fn wrong_kind(&self, dest: &DirectoryNode) -> StoreError {
        StoreError::InvalidNodeType {
            src: self.base.path().to_string(),
            src_kind: NodeKind::File,
            dest: dest.path().to_string(),
            dest_kind: NodeKind::Directory,
        }
    }
}
