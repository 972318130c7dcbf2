//! Workspaces.
//!
//! A workspace is one namespace below the storage root. It holds three
//! parallel trees (content, metadata sidecars, permission sidecars) and a
//! version-control repository covering all of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage_codec::TransformChain;
use stowage_vcs::VcsHandle;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::node::{DirectoryNode, FileNode, Node};
use crate::user::User;

/// Handle on one namespace, acting as one user.
///
/// Cheap to clone; clones share the version-control handle.
#[derive(Debug, Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

#[derive(Debug)]
struct WorkspaceInner {
    namespace: String,
    user: User,
    config: Arc<StoreConfig>,
    vcs: Arc<VcsHandle>,
    storage_transforms: TransformChain,
    attachment_transforms: TransformChain,
    namespace_dir: PathBuf,
}

impl Workspace {
    pub(crate) fn new(
        user: User,
        namespace: &str,
        config: Arc<StoreConfig>,
        vcs: Arc<VcsHandle>,
        storage_transforms: TransformChain,
        attachment_transforms: TransformChain,
    ) -> StoreResult<Self> {
        validate_namespace(namespace, &config)?;
        let namespace_dir = config.storage_root.join(namespace);
        Ok(Self {
            inner: Arc::new(WorkspaceInner {
                namespace: namespace.to_string(),
                user,
                config,
                vcs,
                storage_transforms,
                attachment_transforms,
                namespace_dir,
            }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// The acting user.
    pub fn user(&self) -> &User {
        &self.inner.user
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Version-control handle of this namespace.
    pub fn vcs(&self) -> &VcsHandle {
        &self.inner.vcs
    }

    pub fn namespace_dir(&self) -> &Path {
        &self.inner.namespace_dir
    }

    /// Root of the content tree.
    pub fn storage_dir(&self) -> PathBuf {
        self.inner.namespace_dir.join(&self.inner.config.storage_dirname)
    }

    /// Root of the metadata sidecar tree.
    pub fn metadata_dir(&self) -> PathBuf {
        self.inner.namespace_dir.join(&self.inner.config.metadata_dirname)
    }

    /// Root of the permission sidecar tree.
    pub fn permission_dir(&self) -> PathBuf {
        self.inner.namespace_dir.join(&self.inner.config.permission_dirname)
    }

    pub(crate) fn storage_transforms(&self) -> &TransformChain {
        &self.inner.storage_transforms
    }

    pub(crate) fn attachment_transforms(&self) -> &TransformChain {
        &self.inner.attachment_transforms
    }

    /// True if `name` may never be used as a node name.
    pub fn is_reserved_name(&self, name: &str) -> bool {
        self.inner.config.reserved_names.iter().any(|r| r == name)
            || self.vcs().backend().reserved_names().contains(&name)
    }

    /// True if the workspace has been created.
    pub fn exists(&self) -> bool {
        self.storage_dir().is_dir()
    }

    /// Create the namespace directory, the repository and the root node.
    pub fn create(&self) -> StoreResult<DirectoryNode> {
        if self.exists() {
            return Err(StoreError::invalid_path(format!(
                "workspace {} already exists",
                self.namespace()
            )));
        }
        std::fs::create_dir_all(self.namespace_dir())?;
        self.vcs().init()?;
        let root = self.root().create()?;
        tracing::info!(namespace = %self.namespace(), user = %self.user(), "workspace created");
        Ok(root)
    }

    /// Remove the namespace directory with all three trees.
    pub fn delete(&self) -> StoreResult<()> {
        if !self.exists() {
            return Err(StoreError::invalid_path(format!(
                "workspace {} not found",
                self.namespace()
            )));
        }
        std::fs::remove_dir_all(self.namespace_dir())?;
        tracing::info!(namespace = %self.namespace(), user = %self.user(), "workspace deleted");
        Ok(())
    }

    /// The root directory node.
    pub fn root(&self) -> DirectoryNode {
        DirectoryNode::new(self.clone(), "/")
    }

    /// Typed node at `path`, see [`DirectoryNode::find_object`].
    pub fn find_object(&self, path: &str) -> StoreResult<Node> {
        self.root().find_object(path)
    }

    /// Directory handle at `path`, whether or not it exists.
    pub fn directory(&self, path: &str) -> DirectoryNode {
        self.root().directory(path)
    }

    /// File handle at `path`, whether or not it exists.
    pub fn file(&self, path: &str) -> FileNode {
        self.root().file(path)
    }

    /// Stage paths in the repository.
    pub(crate) fn stage(&self, paths: &[PathBuf]) -> StoreResult<()> {
        self.vcs().add(paths)?;
        Ok(())
    }

    /// Unstage paths removed from the working tree.
    pub(crate) fn unstage(&self, paths: &[PathBuf], directory: bool) -> StoreResult<()> {
        self.vcs().remove(paths, directory)?;
        Ok(())
    }

    /// Run `body` as one commit, or roll back if it fails.
    pub(crate) fn transaction<T>(
        &self,
        message: &str,
        body: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.vcs().transaction(message, body)
    }
}

fn validate_namespace(namespace: &str, config: &StoreConfig) -> StoreResult<()> {
    if namespace.is_empty() {
        return Err(StoreError::invalid_argument("namespace is empty"));
    }
    if namespace.contains('/') {
        return Err(StoreError::invalid_argument(format!(
            "namespace {} includes '/'",
            namespace
        )));
    }
    if config.reserved_names.iter().any(|r| r == namespace) {
        return Err(StoreError::invalid_argument(format!(
            "namespace {} is reserved",
            namespace
        )));
    }
    Ok(())
}
