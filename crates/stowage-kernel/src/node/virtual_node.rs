//! Paths with nothing on disk.

use super::{DirectoryNode, FileNode, NodeBase, StoreNode};
use crate::types::NodeKind;
use crate::workspace::Workspace;

/// A path lookup found nothing at.
///
/// Every operation that needs an existing target fails with
/// [`StoreError::InvalidPath`](crate::StoreError::InvalidPath). Convert it
/// to the handle you want to create.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    base: NodeBase,
}

impl StoreNode for VirtualNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
}

impl VirtualNode {
    pub(crate) fn new(workspace: Workspace, path: &str) -> Self {
        Self {
            base: NodeBase::new(workspace, path, NodeKind::Virtual),
        }
    }

    pub fn into_file(self) -> FileNode {
        FileNode::new(self.base.workspace().clone(), self.base.path())
    }

    pub fn into_directory(self) -> DirectoryNode {
        DirectoryNode::from_base(self.base)
    }
}
