//! Reentrant commit-or-rollback transactions.

use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::path::{Path, PathBuf};

use crate::{BackendKind, Snapshot, VcsError, VcsResult, VersionControl};

/// A workspace's handle on its version-control backend.
///
/// Only the outermost [`transaction`](Self::transaction) on a thread commits
/// or rolls back; nested calls run their body and defer to the enclosing
/// one. Transactions on one handle are serialized across threads.
pub struct VcsHandle {
    backend: Box<dyn VersionControl>,
    depth: ReentrantMutex<Cell<usize>>,
}

impl std::fmt::Debug for VcsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcsHandle")
            .field("backend", &self.backend)
            .finish()
    }
}

/// Restores the nesting depth even if the body panics.
struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl VcsHandle {
    /// Wrap an already-constructed backend.
    pub fn new(backend: Box<dyn VersionControl>) -> Self {
        Self {
            backend,
            depth: ReentrantMutex::new(Cell::new(0)),
        }
    }

    /// Open the backend of the given kind for a repository at `root`.
    pub fn open(kind: BackendKind, root: impl Into<PathBuf>) -> Self {
        Self::new(kind.backend(root))
    }

    /// The underlying backend.
    pub fn backend(&self) -> &dyn VersionControl {
        self.backend.as_ref()
    }

    /// Returns true while a transaction is running on this thread.
    pub fn in_transaction(&self) -> bool {
        self.depth.lock().get() > 0
    }

    /// Run `body` as one unit of history.
    ///
    /// On success the outermost call commits everything staged during the
    /// body under `message`. On failure it resets the working tree to the
    /// last commit and returns the body's error unchanged.
    pub fn transaction<T, E>(
        &self,
        message: &str,
        body: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<VcsError>,
    {
        let depth = self.depth.lock();
        let outermost = depth.get() == 0;
        let result = {
            let _guard = DepthGuard::enter(&depth);
            body()
        };

        if !outermost {
            return result;
        }

        match result {
            Ok(value) => {
                if let Err(e) = self.backend.commit(message) {
                    tracing::warn!(message, error = %e, "commit failed, rolling back");
                    if let Err(rb) = self.backend.rollback() {
                        tracing::warn!(error = %rb, "rollback after failed commit failed");
                    }
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(message, "transaction failed, rolling back");
                if let Err(rb) = self.backend.rollback() {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Initialize the repository.
    pub fn init(&self) -> VcsResult<()> {
        self.backend.init()
    }

    /// Stage paths.
    pub fn add(&self, paths: &[PathBuf]) -> VcsResult<()> {
        self.backend.add(paths)
    }

    /// Unstage removed paths.
    pub fn remove(&self, paths: &[PathBuf], directory: bool) -> VcsResult<()> {
        self.backend.remove(paths, directory)
    }

    /// Read a path as it was at `revision`.
    pub fn read(&self, path: &Path, revision: &str) -> VcsResult<Snapshot> {
        self.backend.read(path, revision)
    }

    /// Revisions that touched `path`, newest first.
    pub fn revisions(&self, path: &Path) -> VcsResult<Vec<String>> {
        self.backend.revisions(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Backend that records calls.
    #[derive(Debug, Default)]
    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl VersionControl for Recording {
        fn reserved_names(&self) -> &'static [&'static str] {
            &[]
        }
        fn placeholder_name(&self) -> Option<&'static str> {
            None
        }
        fn init(&self) -> VcsResult<()> {
            Ok(())
        }
        fn add(&self, _paths: &[PathBuf]) -> VcsResult<()> {
            Ok(())
        }
        fn remove(&self, _paths: &[PathBuf], _directory: bool) -> VcsResult<()> {
            Ok(())
        }
        fn commit(&self, message: &str) -> VcsResult<()> {
            self.log.lock().push(format!("commit {}", message));
            Ok(())
        }
        fn rollback(&self) -> VcsResult<()> {
            self.log.lock().push("rollback".into());
            Ok(())
        }
        fn read(&self, path: &Path, revision: &str) -> VcsResult<Snapshot> {
            Err(VcsError::invalid_revision(path.display().to_string(), revision))
        }
        fn revisions(&self, _path: &Path) -> VcsResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn recording() -> (VcsHandle, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = VcsHandle::new(Box::new(Recording { log: log.clone() }));
        (handle, log)
    }

    #[test]
    fn test_only_outermost_commits() {
        let (handle, log) = recording();
        let result: Result<u32, VcsError> = handle.transaction("outer", || {
            assert!(handle.in_transaction());
            handle.transaction("inner", || Ok::<_, VcsError>(()))?;
            handle.transaction("inner again", || Ok::<_, VcsError>(()))?;
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(*log.lock(), vec!["commit outer".to_string()]);
        assert!(!handle.in_transaction());
    }

    #[test]
    fn test_failure_rolls_back_once() {
        let (handle, log) = recording();
        let result: Result<(), VcsError> = handle.transaction("outer", || {
            handle.transaction("inner", || Err(VcsError::other("boom")))
        });
        assert!(matches!(result, Err(VcsError::Other(_))));
        assert_eq!(*log.lock(), vec!["rollback".to_string()]);
    }

    #[test]
    fn test_caught_inner_failure_still_commits() {
        let (handle, log) = recording();
        let result: Result<(), VcsError> = handle.transaction("outer", || {
            let inner: Result<(), VcsError> =
                handle.transaction("inner", || Err(VcsError::other("ignored")));
            assert!(inner.is_err());
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(*log.lock(), vec!["commit outer".to_string()]);
    }
}
