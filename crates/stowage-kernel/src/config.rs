//! Store configuration.
//!
//! One [`StoreConfig`] is built at startup and handed to
//! [`Store::new`](crate::Store::new); nothing reads ambient global state.
//!
//! ```toml
//! storage_root = "/var/lib/stowage"
//! lock_timeout_ms = 250
//! version_control = "git"
//!
//! [default_guest_permission]
//! read = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stowage_vcs::BackendKind;

use crate::error::{StoreError, StoreResult};
use crate::types::{CHMOD, CHOWN, PermissionSet, READ, WRITE, permission_set};

/// Store-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per workspace.
    pub storage_root: PathBuf,
    /// Content tree name inside a workspace.
    pub storage_dirname: String,
    /// Metadata sidecar tree name inside a workspace.
    pub metadata_dirname: String,
    /// Permission sidecar tree name inside a workspace.
    pub permission_dirname: String,
    /// Metadata sidecar extension.
    pub metadata_extension: String,
    /// Permission sidecar extension.
    pub permission_extension: String,
    /// Reserved identifier of the superuser.
    pub superuser_identifier: String,
    /// Reserved identifier of the guest.
    pub guest_identifier: String,
    /// How long lock acquisition may block, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Disk usage charged to every directory for itself.
    pub directory_unit: u64,
    /// Informational per-directory byte limit recorded in metadata.
    pub directory_bytes_limit: u64,
    /// Indent sidecar JSON.
    pub pretty_json: bool,
    /// Granted to a node's creator.
    pub default_owner_permission: PermissionSet,
    /// Granted to everyone without a matching entry.
    pub default_guest_permission: PermissionSet,
    /// Version-control backend for new workspace handles.
    pub version_control: BackendKind,
    /// Names never usable for nodes, on top of the backend's own.
    pub reserved_names: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/tmp/stowage"),
            storage_dirname: "storage".into(),
            metadata_dirname: "metadata".into(),
            permission_dirname: "permission".into(),
            metadata_extension: ".meta".into(),
            permission_extension: ".perm".into(),
            superuser_identifier: "root".into(),
            guest_identifier: "nobody".into(),
            lock_timeout_ms: 100,
            directory_unit: 4096,
            directory_bytes_limit: 1 << 30,
            pretty_json: false,
            default_owner_permission: permission_set([
                (READ, true),
                (WRITE, true),
                (CHOWN, true),
                (CHMOD, true),
            ]),
            default_guest_permission: PermissionSet::new(),
            version_control: BackendKind::None,
            reserved_names: vec![".".into(), "..".into()],
        }
    }
}

impl StoreConfig {
    /// Defaults with a different storage root.
    pub fn with_storage_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Parse TOML; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded store config");
        Ok(config)
    }

    /// Lock acquisition timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Reject settings that would break the on-disk layout.
    pub fn validate(&self) -> StoreResult<()> {
        for (field, name) in [
            ("storage_dirname", &self.storage_dirname),
            ("metadata_dirname", &self.metadata_dirname),
            ("permission_dirname", &self.permission_dirname),
        ] {
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(StoreError::Config(format!("{} is not a plain name: {:?}", field, name)));
            }
        }
        let trees = [
            &self.storage_dirname,
            &self.metadata_dirname,
            &self.permission_dirname,
        ];
        if trees[0] == trees[1] || trees[0] == trees[2] || trees[1] == trees[2] {
            return Err(StoreError::Config("tree directory names must differ".into()));
        }
        for (field, ext) in [
            ("metadata_extension", &self.metadata_extension),
            ("permission_extension", &self.permission_extension),
        ] {
            if ext.len() < 2 || !ext.starts_with('.') || ext.contains('/') {
                return Err(StoreError::Config(format!("{} must look like \".ext\": {:?}", field, ext)));
            }
        }
        if self.metadata_extension == self.permission_extension {
            return Err(StoreError::Config("sidecar extensions must differ".into()));
        }
        if self.superuser_identifier == self.guest_identifier {
            return Err(StoreError::Config(
                "superuser and guest identifiers must differ".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.metadata_extension, ".meta");
        assert_eq!(config.permission_extension, ".perm");
        assert_eq!(config.lock_timeout(), Duration::from_millis(100));
        assert_eq!(config.default_owner_permission.get(CHMOD), Some(&true));
        assert!(config.default_guest_permission.is_empty());
        assert_eq!(config.version_control, BackendKind::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            storage_root = "/srv/stowage"
            lock_timeout_ms = 250
            version_control = "git"

            [default_guest_permission]
            read = true
            "#,
        )
        .unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/srv/stowage"));
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.version_control, BackendKind::Git);
        assert_eq!(config.default_guest_permission.get(READ), Some(&true));
        assert_eq!(config.directory_unit, 4096);
    }

    #[test]
    fn test_invalid_toml() {
        let result = StoreConfig::from_toml_str("lock_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_layout() {
        let mut config = StoreConfig::default();
        config.metadata_dirname = "storage".into();
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.permission_extension = "perm".into();
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.guest_identifier = "root".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.toml");
        std::fs::write(&path, "directory_unit = 512\n").unwrap();
        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.directory_unit, 512);

        assert!(StoreConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
