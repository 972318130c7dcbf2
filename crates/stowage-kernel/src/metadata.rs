//! Metadata sidecars and counter aggregation.
//!
//! A directory's disk usage is the configured directory unit plus the usage
//! of everything below it, and it keeps two counters: immediate children
//! (`directory_file_count`) and all descendants (`tree_file_count`). Every
//! structural change adjusts the parent and lets the delta climb to the
//! root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::attachment::Sidecar;
use crate::error::StoreResult;
use crate::node::NodeBase;
use crate::path::format_size;
use crate::user::Identifier;

/// Metadata record as stored in a `.meta` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Human-readable form of `bytes`.
    pub size: String,
    /// Content length (files) or the directory unit (directories).
    pub bytes: i64,
    pub owner: Identifier,
    pub is_dir: bool,
    pub created_at: String,
    pub updated_at: String,
    pub created_at_unix_timestamp: i64,
    pub updated_at_unix_timestamp: i64,

    /// Human-readable form of `directory_bytes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_size: Option<String>,
    /// Unit plus aggregated subtree usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_size_limit: Option<String>,
    /// Informational; not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_bytes_limit: Option<i64>,
    /// Immediate children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_file_count: Option<i64>,
    /// All descendants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_file_count: Option<i64>,
}

impl MetadataRecord {
    /// Fresh record for a file of `bytes` length.
    pub fn file(bytes: i64, owner: Identifier, timestamp: DateTime<Utc>) -> Self {
        Self {
            size: format_size(bytes),
            bytes,
            owner,
            is_dir: false,
            created_at: timestamp.to_rfc3339(),
            updated_at: timestamp.to_rfc3339(),
            created_at_unix_timestamp: timestamp.timestamp(),
            updated_at_unix_timestamp: timestamp.timestamp(),
            directory_size: None,
            directory_bytes: None,
            directory_size_limit: None,
            directory_bytes_limit: None,
            directory_file_count: None,
            tree_file_count: None,
        }
    }

    /// Fresh record for an empty directory.
    pub fn directory(unit: i64, limit: i64, owner: Identifier, timestamp: DateTime<Utc>) -> Self {
        Self {
            is_dir: true,
            directory_size: Some(format_size(unit)),
            directory_bytes: Some(unit),
            directory_size_limit: Some(format_size(limit)),
            directory_bytes_limit: Some(limit),
            directory_file_count: Some(0),
            tree_file_count: Some(0),
            ..Self::file(unit, owner, timestamp)
        }
    }

    /// Usage charged to this node in its parent's total.
    pub fn disk_usage(&self) -> i64 {
        if self.is_dir {
            self.directory_bytes.unwrap_or(self.bytes)
        } else {
            self.bytes
        }
    }

    pub fn set_disk_usage(&mut self, usage: i64) {
        if self.is_dir {
            self.directory_size = Some(format_size(usage));
            self.directory_bytes = Some(usage);
        } else {
            self.size = format_size(usage);
            self.bytes = usage;
        }
    }

    pub fn directory_file_count(&self) -> i64 {
        self.directory_file_count.unwrap_or(0)
    }

    pub fn tree_file_count(&self) -> i64 {
        self.tree_file_count.unwrap_or(0)
    }

    pub fn set_updated_at(&mut self, timestamp: DateTime<Utc>) {
        self.updated_at = timestamp.to_rfc3339();
        self.updated_at_unix_timestamp = timestamp.timestamp();
    }

    /// Apply counter deltas. Counts only apply to directories.
    fn apply(&mut self, disk_usage: i64, directory_file_count: i64, tree_file_count: i64) {
        if self.is_dir {
            self.directory_file_count = Some(self.directory_file_count() + directory_file_count);
            self.tree_file_count = Some(self.tree_file_count() + tree_file_count);
        }
        let usage = self.disk_usage() + disk_usage;
        self.set_disk_usage(usage);
    }
}

/// Metadata sidecar of one node.
#[derive(Debug)]
pub(crate) struct Metadata {
    node: NodeBase,
    sidecar: Sidecar<MetadataRecord>,
}

impl Metadata {
    pub(crate) fn new(node: &NodeBase) -> Self {
        Self {
            sidecar: Sidecar::new(node.workspace().clone(), node.metadata_path()),
            node: node.clone(),
        }
    }

    /// Record to use when no sidecar exists.
    fn initial(node: &NodeBase, bytes: i64) -> StoreResult<MetadataRecord> {
        let config = node.workspace().config();
        let timestamp = modified_at(node);
        let owner = node.initial_owner();
        Ok(if node.is_dir_path() {
            MetadataRecord::directory(
                config.directory_unit as i64,
                config.directory_bytes_limit as i64,
                owner,
                timestamp,
            )
        } else {
            MetadataRecord::file(bytes, owner, timestamp)
        })
    }

    pub(crate) fn data(&mut self) -> StoreResult<&mut MetadataRecord> {
        let node = &self.node;
        self.sidecar.data_or_init(|| Self::initial(node, 0))
    }

    pub(crate) fn save(&mut self) -> StoreResult<()> {
        self.sidecar.save()
    }

    pub(crate) fn reload(&mut self) {
        self.sidecar.reload();
    }

    pub(crate) fn disk_usage(&mut self) -> StoreResult<i64> {
        Ok(self.data()?.disk_usage())
    }

    /// Write the initial record of a new node and charge it to the parent.
    pub(crate) fn create(&mut self, bytes: i64) -> StoreResult<()> {
        let record = Self::initial(&self.node, bytes)?;
        let usage = record.disk_usage();
        self.sidecar.set(record);
        self.sidecar.save()?;
        self.update_parent(usage, 1, 1)
    }

    /// Apply deltas here, then optionally pass usage and tree count upward.
    ///
    /// The immediate-child count stops at the first recipient.
    pub(crate) fn update(
        &mut self,
        disk_usage: i64,
        directory_file_count: i64,
        tree_file_count: i64,
        recursive: bool,
    ) -> StoreResult<()> {
        self.data()?
            .apply(disk_usage, directory_file_count, tree_file_count);
        self.save()?;
        tracing::debug!(
            path = %self.node.path(),
            disk_usage,
            directory_file_count,
            tree_file_count,
            "metadata updated"
        );
        if recursive {
            self.update_parent(disk_usage, 0, tree_file_count)?;
        }
        Ok(())
    }

    /// Update the parent recursively; a no-op at the root.
    pub(crate) fn update_parent(
        &self,
        disk_usage: i64,
        directory_file_count: i64,
        tree_file_count: i64,
    ) -> StoreResult<()> {
        match self.node.parent_base() {
            Some(parent) => Metadata::new(&parent).update(
                disk_usage,
                directory_file_count,
                tree_file_count,
                true,
            ),
            None => Ok(()),
        }
    }

    /// Uncharge this node from its ancestors, then remove the sidecar.
    pub(crate) fn delete(&mut self) -> StoreResult<()> {
        let usage = self.disk_usage()?;
        self.update_parent(-usage, -1, -1)?;
        self.sidecar.delete(self.node.is_dir_path())
    }

    pub(crate) fn set_owner(&mut self, owner: Identifier) -> StoreResult<()> {
        self.data()?.owner = owner;
        self.save()
    }

    pub(crate) fn touch(&mut self) -> StoreResult<()> {
        self.reload();
        self.data()?.set_updated_at(Utc::now());
        self.save()
    }
}

fn modified_at(node: &NodeBase) -> DateTime<Utc> {
    std::fs::metadata(node.storage_path())
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_file_record() {
        let record = MetadataRecord::file(5, Identifier::from("foo"), now());
        assert_eq!(record.disk_usage(), 5);
        assert_eq!(record.size, "5 bytes");
        assert!(!record.is_dir);
        assert_eq!(record.directory_file_count(), 0);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_directory_record() {
        let record = MetadataRecord::directory(4096, 1 << 30, Identifier::from("foo"), now());
        assert_eq!(record.disk_usage(), 4096);
        assert_eq!(record.directory_size.as_deref(), Some("4.00KB"));
        assert_eq!(record.directory_size_limit.as_deref(), Some("1.00GB"));
        assert_eq!(record.bytes, 4096);
        assert_eq!(record.tree_file_count(), 0);
    }

    #[test]
    fn test_apply_counts_only_on_directories() {
        let mut file = MetadataRecord::file(5, Identifier::from("foo"), now());
        file.apply(-3, 1, 1);
        assert_eq!(file.disk_usage(), 2);
        assert_eq!(file.directory_file_count, None);

        let mut dir = MetadataRecord::directory(4096, 1 << 30, Identifier::from("foo"), now());
        dir.apply(4101, 1, 2);
        assert_eq!(dir.disk_usage(), 8197);
        assert_eq!(dir.directory_file_count(), 1);
        assert_eq!(dir.tree_file_count(), 2);
        // bytes keeps the unit
        assert_eq!(dir.bytes, 4096);
    }

    #[test]
    fn test_json_shape() {
        let file = MetadataRecord::file(5, Identifier::composite(["g", "u"]), now());
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["owner"], serde_json::json!(["g", "u"]));
        assert!(json.get("tree_file_count").is_none());

        let dir = MetadataRecord::directory(4096, 1 << 30, Identifier::from("foo"), now());
        let json = serde_json::to_value(&dir).unwrap();
        assert_eq!(json["directory_file_count"], 0);
        let back: MetadataRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, dir);
    }

    #[test]
    fn test_touch_moves_updated_at() {
        let mut record = MetadataRecord::file(0, Identifier::from("foo"), DateTime::<Utc>::UNIX_EPOCH);
        record.set_updated_at(now());
        assert_ne!(record.updated_at, record.created_at);
        assert_eq!(record.created_at_unix_timestamp, 0);
    }
}
