//! Store entry point.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;

use stowage_codec::TransformChain;
use stowage_vcs::VcsHandle;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::user::{Identifier, User};
use crate::workspace::Workspace;

/// All workspaces below one storage root.
///
/// Workspaces opened through the same store share one version-control
/// handle per namespace, so their transactions nest and serialize.
pub struct Store {
    config: Arc<StoreConfig>,
    storage_transforms: TransformChain,
    attachment_transforms: TransformChain,
    handles: Mutex<HashMap<String, Arc<VcsHandle>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("storage_root", &self.config.storage_root)
            .field("version_control", &self.config.version_control)
            .field("storage_transforms", &self.storage_transforms)
            .field("attachment_transforms", &self.attachment_transforms)
            .finish()
    }
}

impl Store {
    /// Build a store from validated configuration.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            storage_transforms: TransformChain::new(),
            attachment_transforms: TransformChain::new(),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Transforms applied to file content.
    pub fn with_storage_transforms(mut self, chain: TransformChain) -> Self {
        self.storage_transforms = chain;
        self
    }

    /// Transforms applied to metadata and permission sidecars.
    pub fn with_attachment_transforms(mut self, chain: TransformChain) -> Self {
        self.attachment_transforms = chain;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A regular user with the given identifier chain.
    pub fn user<I, T>(&self, identifiers: I) -> StoreResult<User>
    where
        I: IntoIterator<Item = T>,
        T: Into<Identifier>,
    {
        User::new(identifiers, &self.config)
    }

    pub fn superuser(&self) -> User {
        User::superuser(&self.config)
    }

    pub fn guest(&self) -> User {
        User::guest(&self.config)
    }

    /// Open `namespace` as `user`. The workspace need not exist yet.
    pub fn workspace(&self, user: &User, namespace: &str) -> StoreResult<Workspace> {
        let vcs = {
            let mut handles = self.handles.lock();
            handles
                .entry(namespace.to_string())
                .or_insert_with(|| {
                    Arc::new(VcsHandle::open(
                        self.config.version_control,
                        self.config.storage_root.join(namespace),
                    ))
                })
                .clone()
        };
        Workspace::new(
            user.clone(),
            namespace,
            self.config.clone(),
            vcs,
            self.storage_transforms.clone(),
            self.attachment_transforms.clone(),
        )
    }

    /// Names of existing workspaces, sorted. Creates the storage root if needed.
    pub fn workspace_names(&self) -> StoreResult<Vec<String>> {
        let root = &self.config.storage_root;
        std::fs::create_dir_all(root)?;

        let backend = self.config.version_control.backend(root.clone());
        let reserved = backend.reserved_names();

        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.config.reserved_names.contains(&name) || reserved.contains(&name.as_str()) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_names() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested/root");
        let store = Store::new(StoreConfig::with_storage_root(&root)).unwrap();

        assert!(store.workspace_names().unwrap().is_empty());
        assert!(root.is_dir());

        let user = store.user(["foo"]).unwrap();
        store.workspace(&user, "beta").unwrap().create().unwrap();
        store.workspace(&user, "alpha").unwrap().create().unwrap();
        assert_eq!(store.workspace_names().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StoreConfig::default();
        config.metadata_extension = "meta".into();
        assert!(Store::new(config).is_err());
    }

    #[test]
    fn test_workspaces_share_vcs_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(StoreConfig::with_storage_root(dir.path())).unwrap();
        let a = store.workspace(&store.superuser(), "ws").unwrap();
        let b = store.workspace(&store.guest(), "ws").unwrap();
        assert!(std::ptr::eq(a.vcs(), b.vcs()));
    }
}
