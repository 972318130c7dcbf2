//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use stowage_kernel::{
    BackendKind, DirectoryNode, Node, Store, StoreConfig, StoreNode, Workspace,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const UNIT: i64 = 4096;

/// Route `tracing` output through the test harness; `RUST_LOG` filters it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Fixture {
    pub dir: TempDir,
    pub store: Store,
    /// Workspace "ws" as user `foo`, already created.
    pub ws: Workspace,
}

impl Fixture {
    pub fn new(backend: BackendKind) -> Self {
        Self::with_config(backend, |_| {})
    }

    pub fn with_config(backend: BackendKind, tweak: impl FnOnce(&mut StoreConfig)) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::with_storage_root(dir.path());
        config.version_control = backend;
        tweak(&mut config);
        let store = Store::new(config).unwrap();
        let ws = open(&store, "foo");
        ws.create().unwrap();
        Self { dir, store, ws }
    }

    /// The same workspace as another user.
    pub fn as_user(&self, identifier: &str) -> Workspace {
        open(&self.store, identifier)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn open(store: &Store, identifier: &str) -> Workspace {
    let user = store.user([identifier]).unwrap();
    store.workspace(&user, "ws").unwrap()
}

/// Check the aggregation invariants on every directory below `dir`.
///
/// Returns `(disk usage, tree file count)` recomputed from the children.
pub fn assert_consistent(dir: &DirectoryNode) -> (i64, i64) {
    let mut usage = UNIT;
    let mut count = 0;
    let mut immediate = 0;
    for child in dir.children().unwrap() {
        immediate += 1;
        match child {
            Node::Directory(sub) => {
                let (sub_usage, sub_count) = assert_consistent(&sub);
                usage += sub_usage;
                count += 1 + sub_count;
            }
            Node::File(file) => {
                usage += file.disk_usage().unwrap();
                count += 1;
            }
            Node::Virtual(_) => unreachable!("children exist"),
        }
    }
    let record = dir.metadata().unwrap();
    assert_eq!(record.disk_usage(), usage, "disk usage of {}", dir.path());
    assert_eq!(record.tree_file_count(), count, "tree count of {}", dir.path());
    assert_eq!(
        record.directory_file_count(),
        immediate,
        "child count of {}",
        dir.path()
    );
    (usage, count)
}

/// Every entry below `dir`, relative and sorted.
pub fn tree_listing(dir: &Path) -> Vec<PathBuf> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            out.push(path.strip_prefix(base).unwrap().to_path_buf());
            if path.is_dir() {
                walk(base, &path, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
