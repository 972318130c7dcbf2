//! # stowage-kernel
//!
//! Permissioned, version-controlled virtual filesystem over a plain
//! directory tree.
//!
//! A [`Store`] hands out [`Workspace`]s, one per namespace below its
//! storage root. A workspace keeps three parallel trees:
//! - `storage/` - the file content, passed through the storage transforms
//! - `metadata/` - one JSON sidecar per node with sizes, counts and owner
//! - `permission/` - one JSON sidecar per node with access grants
//!
//! Nodes ([`FileNode`], [`DirectoryNode`], [`VirtualNode`]) are cheap
//! handles on paths. Every operation on them is locked, validated,
//! authorized and, for mutations, committed as one version-control
//! transaction.
//!
//! ```no_run
//! use stowage_kernel::{Store, StoreConfig};
//!
//! # fn main() -> stowage_kernel::StoreResult<()> {
//! let store = Store::new(StoreConfig::with_storage_root("/var/lib/stowage"))?;
//! let user = store.user(["foo"])?;
//! let ws = store.workspace(&user, "docs")?;
//! ws.create()?;
//! ws.directory("/x").create()?;
//! ws.file("/x/f.txt").create("hello")?;
//! assert_eq!(ws.root().tree_file_count()?, 2);
//! # Ok(())
//! # }
//! ```

mod attachment;
pub mod config;
pub mod error;
pub mod lock;
pub mod metadata;
pub mod node;
pub mod path;
pub mod permission;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod user;
pub mod workspace;

pub use config::StoreConfig;
pub use error::{Denial, StoreError, StoreErrorKind, StoreResult};
pub use lock::LockMode;
pub use metadata::MetadataRecord;
pub use node::{DirectoryNode, FileNode, Node, NodeBase, StoreNode, VirtualNode};
pub use path::format_size;
pub use permission::PermissionRecord;
pub use pipeline::Operation;
pub use store::Store;
pub use types::{CHMOD, CHOWN, NodeKind, PermissionSet, READ, WRITE, permission_set};
pub use user::{Identifier, User, UserKind};
pub use workspace::Workspace;

pub use stowage_codec::{
    AesGcmTransform, CodecError, CodecResult, GzipTransform, Transform, TransformChain,
};
pub use stowage_vcs::BackendKind;
