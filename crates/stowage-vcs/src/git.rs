//! Version control via libgit2.
//!
//! One repository per workspace, rooted at the workspace's namespace
//! directory. Content, metadata and permission trees are all tracked in it.

use git2::{
    DiffOptions, IndexAddOption, ObjectType, Repository, ResetType, Signature, Sort,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::{Snapshot, VcsError, VcsResult, VersionControl};

/// Name of the marker file that keeps empty directories representable.
pub const KEEP_FILE: &str = ".keep";

const RESERVED: &[&str] = &[".git", KEEP_FILE];

/// Fallback committer when the repository has no `user.name`/`user.email`.
const FALLBACK_NAME: &str = "stowage";
const FALLBACK_EMAIL: &str = "stowage@localhost";

/// libgit2-backed history for one workspace.
///
/// The repository is opened lazily on first use so constructing the
/// backend never touches the disk.
pub struct GitBackend {
    root: PathBuf,
    repo: Mutex<Option<Repository>>,
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("root", &self.root)
            .finish()
    }
}

impl GitBackend {
    /// Create a backend for the repository at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repo: Mutex::new(None),
        }
    }

    /// Repository root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn with_repo<T>(&self, f: impl FnOnce(&Repository) -> VcsResult<T>) -> VcsResult<T> {
        let mut slot = self.repo.lock();
        if slot.is_none() {
            *slot = Some(Repository::open(&self.root)?);
        }
        match slot.as_ref() {
            Some(repo) => f(repo),
            None => Err(VcsError::other("repository is not open")),
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> VcsResult<&'a Path> {
        path.strip_prefix(&self.root)
            .map_err(|_| VcsError::OutsideRepository(path.display().to_string()))
    }

    /// Delete working-tree files that were staged after HEAD.
    ///
    /// A hard reset restores tracked content but leaves files that only
    /// the index knew about.
    fn discard_staged_additions(&self, repo: &Repository) -> VcsResult<()> {
        let head_tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(_) => None,
        };
        let index = repo.index()?;
        for entry in index.iter() {
            let rel = String::from_utf8_lossy(&entry.path).into_owned();
            let in_head = head_tree
                .as_ref()
                .is_some_and(|tree| tree.get_path(Path::new(&rel)).is_ok());
            if in_head {
                continue;
            }
            let full = self.root.join(&rel);
            match std::fs::remove_file(&full) {
                Ok(()) => tracing::debug!(path = %rel, "discarded staged addition"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.prune_empty_parents(&full);
        }
        Ok(())
    }

    /// Remove directories left empty below the repository root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // fails on non-empty directories, which ends the walk
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

impl VersionControl for GitBackend {
    fn reserved_names(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn placeholder_name(&self) -> Option<&'static str> {
        Some(KEEP_FILE)
    }

    fn init(&self) -> VcsResult<()> {
        let repo = Repository::init(&self.root)?;
        *self.repo.lock() = Some(repo);
        tracing::info!(root = %self.root.display(), "initialized git repository");
        Ok(())
    }

    fn add(&self, paths: &[PathBuf]) -> VcsResult<()> {
        self.with_repo(|repo| {
            let mut index = repo.index()?;
            for path in paths {
                let rel = self.relative(path)?;
                if path.is_dir() {
                    index.add_all([rel], IndexAddOption::DEFAULT, None)?;
                } else {
                    index.add_path(rel)?;
                }
            }
            index.write()?;
            Ok(())
        })
    }

    fn remove(&self, paths: &[PathBuf], directory: bool) -> VcsResult<()> {
        self.with_repo(|repo| {
            let mut index = repo.index()?;
            for path in paths {
                let rel = self.relative(path)?;
                if directory {
                    index.remove_dir(rel, 0)?;
                } else {
                    index.remove_path(rel)?;
                }
            }
            index.write()?;
            Ok(())
        })
    }

    fn commit(&self, message: &str) -> VcsResult<()> {
        if message.is_empty() {
            return Err(VcsError::other("commit message cannot be empty"));
        }

        self.with_repo(|repo| {
            let mut index = repo.index()?;
            let tree_oid = index.write_tree()?;
            let tree = repo.find_tree(tree_oid)?;

            let sig = match repo.signature() {
                Ok(sig) => sig,
                Err(_) => Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?,
            };

            let parent = match repo.head() {
                Ok(head) => Some(head.peel_to_commit()?),
                Err(_) => None,
            };
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
            index.write()?;

            tracing::info!(commit = %oid, message, "committed transaction");
            Ok(())
        })
    }

    fn rollback(&self) -> VcsResult<()> {
        self.with_repo(|repo| {
            self.discard_staged_additions(repo)?;
            match repo.head() {
                Ok(head) => {
                    let commit = head.peel_to_commit()?;
                    repo.reset(commit.as_object(), ResetType::Hard, None)?;
                }
                Err(_) => {
                    let mut index = repo.index()?;
                    index.clear()?;
                    index.write()?;
                }
            }
            tracing::warn!(root = %self.root.display(), "rolled back working tree");
            Ok(())
        })
    }

    fn read(&self, path: &Path, revision: &str) -> VcsResult<Snapshot> {
        let display = path.display().to_string();
        let invalid = || VcsError::invalid_revision(display.clone(), revision);

        self.with_repo(|repo| {
            let rel = self.relative(path)?;
            let tree = repo
                .revparse_single(revision)
                .and_then(|object| object.peel_to_tree())
                .map_err(|_| invalid())?;

            if rel.as_os_str().is_empty() {
                return Ok(Snapshot::Directory(tree_names(&tree)));
            }

            let object = tree
                .get_path(rel)
                .and_then(|entry| entry.to_object(repo))
                .map_err(|_| invalid())?;

            match object.kind() {
                Some(ObjectType::Blob) => {
                    let blob = object.as_blob().ok_or_else(invalid)?;
                    Ok(Snapshot::File(blob.content().to_vec()))
                }
                Some(ObjectType::Tree) => {
                    let tree = object.as_tree().ok_or_else(invalid)?;
                    Ok(Snapshot::Directory(tree_names(tree)))
                }
                _ => Err(invalid()),
            }
        })
    }

    fn revisions(&self, path: &Path) -> VcsResult<Vec<String>> {
        self.with_repo(|repo| {
            if repo.head().is_err() {
                return Ok(Vec::new());
            }
            let rel = self.relative(path)?;
            let spec = rel.to_string_lossy().trim_end_matches('/').to_string();

            let mut revwalk = repo.revwalk()?;
            revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
            revwalk.push_head()?;

            let mut revisions = Vec::new();
            for oid in revwalk {
                let oid = oid?;
                let commit = repo.find_commit(oid)?;
                if commit.parent_count() > 1 {
                    continue;
                }
                let tree = commit.tree()?;
                let parent_tree = match commit.parent(0) {
                    Ok(parent) => Some(parent.tree()?),
                    Err(_) => None,
                };

                let mut opts = DiffOptions::new();
                if !spec.is_empty() {
                    opts.pathspec(spec.as_str());
                }
                let diff =
                    repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
                if diff.deltas().len() > 0 {
                    revisions.push(oid.to_string());
                }
            }
            Ok(revisions)
        })
    }
}

fn tree_names(tree: &git2::Tree<'_>) -> Vec<String> {
    tree.iter()
        .filter_map(|entry| entry.name().map(str::to_string))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_repo() -> (GitBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = GitBackend::new(dir.path());
        backend.init().unwrap();
        backend
            .with_repo(|repo| {
                let mut config = repo.config()?;
                config.set_str("user.name", "Test User")?;
                config.set_str("user.email", "test@example.com")?;
                Ok(())
            })
            .unwrap();
        (backend, dir)
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_add_commit_and_read() {
        let (backend, dir) = setup_repo();
        let path = write_file(dir.path(), "storage/hello.txt", "hello");
        backend.add(&[path.clone()]).unwrap();
        backend.commit("created /hello.txt").unwrap();

        match backend.read(&path, "HEAD").unwrap() {
            Snapshot::File(bytes) => assert_eq!(bytes, b"hello"),
            other => panic!("expected file, got {:?}", other),
        }
        match backend.read(&dir.path().join("storage/"), "HEAD").unwrap() {
            Snapshot::Directory(names) => assert_eq!(names, vec!["hello.txt".to_string()]),
            other => panic!("expected directory, got {:?}", other),
        }
    }

    #[test]
    fn test_commit_empty_message_fails() {
        let (backend, _dir) = setup_repo();
        assert!(backend.commit("").is_err());
    }

    #[test]
    fn test_read_invalid_revision() {
        let (backend, dir) = setup_repo();
        let path = write_file(dir.path(), "a.txt", "a");
        backend.add(&[path.clone()]).unwrap();
        backend.commit("init").unwrap();

        let result = backend.read(&path, "0000000000000000000000000000000000000000");
        assert!(matches!(result, Err(VcsError::InvalidRevision { .. })));

        let missing = dir.path().join("missing.txt");
        let result = backend.read(&missing, "HEAD");
        assert!(matches!(result, Err(VcsError::InvalidRevision { .. })));
    }

    #[test]
    fn test_revisions_newest_first() {
        let (backend, dir) = setup_repo();
        let a = write_file(dir.path(), "a.txt", "one");
        backend.add(&[a.clone()]).unwrap();
        backend.commit("first").unwrap();

        let b = write_file(dir.path(), "b.txt", "unrelated");
        backend.add(&[b]).unwrap();
        backend.commit("second").unwrap();

        write_file(dir.path(), "a.txt", "two");
        backend.add(&[a.clone()]).unwrap();
        backend.commit("third").unwrap();

        let revisions = backend.revisions(&a).unwrap();
        assert_eq!(revisions.len(), 2);

        match backend.read(&a, &revisions[0]).unwrap() {
            Snapshot::File(bytes) => assert_eq!(bytes, b"two"),
            other => panic!("expected file, got {:?}", other),
        }
        match backend.read(&a, &revisions[1]).unwrap() {
            Snapshot::File(bytes) => assert_eq!(bytes, b"one"),
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_rollback_restores_tracked_and_discards_new() {
        let (backend, dir) = setup_repo();
        let kept = write_file(dir.path(), "kept.txt", "original");
        backend.add(&[kept.clone()]).unwrap();
        backend.commit("init").unwrap();

        write_file(dir.path(), "kept.txt", "modified");
        backend.add(&[kept.clone()]).unwrap();
        let added = write_file(dir.path(), "added.txt", "new");
        let nested = write_file(dir.path(), "storage/new/.keep", "");
        backend.add(&[added.clone(), nested.clone()]).unwrap();

        backend.rollback().unwrap();

        assert_eq!(std::fs::read_to_string(&kept).unwrap(), "original");
        assert!(!added.exists());
        assert!(!nested.exists());
        assert!(!dir.path().join("storage").exists());
    }

    #[test]
    fn test_remove_then_commit() {
        let (backend, dir) = setup_repo();
        let path = write_file(dir.path(), "gone.txt", "bye");
        backend.add(&[path.clone()]).unwrap();
        backend.commit("add").unwrap();

        std::fs::remove_file(&path).unwrap();
        backend.remove(&[path.clone()], false).unwrap();
        backend.commit("remove").unwrap();

        assert!(matches!(
            backend.read(&path, "HEAD"),
            Err(VcsError::InvalidRevision { .. })
        ));
        assert_eq!(backend.revisions(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_outside_repository_rejected() {
        let (backend, _dir) = setup_repo();
        let result = backend.add(&[PathBuf::from("/definitely/not/here")]);
        assert!(matches!(result, Err(VcsError::OutsideRepository(_))));
    }

    #[test]
    fn test_reserved_names() {
        let backend = GitBackend::new("/nonexistent");
        assert!(backend.reserved_names().contains(&".git"));
        assert_eq!(backend.placeholder_name(), Some(KEEP_FILE));
    }
}
