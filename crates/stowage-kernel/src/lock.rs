//! Advisory node locks.
//!
//! Every node has a lock file next to its metadata sidecar
//! (`<sidecar>.lock`), created the first time an existing node is locked. Locks are BSD `flock`s: they belong to an open file
//! description, so two handles in one process exclude each other just like
//! two processes do. A [`LockSet`] always acquires in ascending path order,
//! which puts ancestors before descendants and keeps concurrent callers
//! from deadlocking; it releases in reverse.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::{StoreError, StoreResult};

/// How often a blocked acquisition retries.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lock mode. `Exclusive` is the stronger of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// When a missing lock file may be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Provision {
    /// Create it, and its directory one level deep.
    Always,
    /// Only while the node's content exists; otherwise the lock is skipped.
    WhileExists(PathBuf),
}

/// One lock to take: the lock file, the node path it stands for and how.
#[derive(Debug, Clone)]
pub(crate) struct LockTarget {
    pub lock_file: PathBuf,
    pub node_path: String,
    pub mode: LockMode,
    pub provision: Provision,
}

impl LockTarget {
    /// The same lock, created even though the node doesn't exist yet.
    pub(crate) fn provisioned(self) -> Self {
        Self {
            provision: Provision::Always,
            ..self
        }
    }

    /// Merge a duplicate entry for the same lock file.
    fn absorb(&mut self, other: LockTarget) {
        self.mode = self.mode.max(other.mode);
        if other.provision == Provision::Always {
            self.provision = Provision::Always;
        }
    }
}

/// One held lock. Released on drop.
#[derive(Debug)]
pub(crate) struct LockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    /// Acquire `target`, waiting at most `timeout`.
    ///
    /// `Ok(None)` when the node does not exist and has no lock file: there
    /// is nothing to guard, and validation will reject the operation.
    pub(crate) fn acquire(target: &LockTarget, timeout: Duration) -> StoreResult<Option<Self>> {
        let LockTarget {
            lock_file,
            node_path,
            mode,
            provision,
        } = target;
        let mode = *mode;
        let create = match provision {
            Provision::Always => true,
            Provision::WhileExists(storage) => std::fs::symlink_metadata(storage).is_ok(),
        };
        if create {
            if let Some(dir) = lock_file.parent() {
                match std::fs::create_dir(dir) {
                    Err(e) if e.kind() != ErrorKind::AlreadyExists => return Err(e.into()),
                    _ => {}
                }
            }
        }
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(lock_file)
        {
            Ok(file) => file,
            Err(e)
                if !create
                    && matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) =>
            {
                tracing::trace!(path = %node_path, "nothing to lock");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let deadline = Instant::now() + timeout;
        loop {
            if sys::try_lock(&file, mode)? {
                tracing::debug!(path = %node_path, %mode, "lock acquired");
                return Ok(Some(Self {
                    file,
                    path: lock_file.clone(),
                    mode,
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(path = %node_path, %mode, ?timeout, "lock timed out");
                return Err(StoreError::LockTimeout {
                    path: node_path.clone(),
                    mode,
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "unlock failed");
        }
        tracing::trace!(path = %self.path.display(), mode = %self.mode, "lock released");
    }
}

/// Locks held together, released in reverse acquisition order.
#[derive(Debug, Default)]
pub(crate) struct LockSet {
    guards: Vec<LockGuard>,
}

impl LockSet {
    /// Lock every target in ascending node path order.
    ///
    /// Duplicates are locked once in the stronger mode. On failure the
    /// locks already taken are released before returning.
    pub(crate) fn acquire(mut targets: Vec<LockTarget>, timeout: Duration) -> StoreResult<Self> {
        targets.sort_by(|a, b| a.node_path.cmp(&b.node_path));
        let mut merged: Vec<LockTarget> = Vec::with_capacity(targets.len());
        for target in targets {
            match merged.last_mut() {
                Some(last) if last.lock_file == target.lock_file => last.absorb(target),
                _ => merged.push(target),
            }
        }

        let mut set = LockSet::default();
        for target in &merged {
            set.claim(target, timeout)?;
        }
        Ok(set)
    }

    /// Add one more lock to the set, unless it is already held.
    ///
    /// Only for nodes below ones already held exclusively, which keeps the
    /// ancestor-first order intact.
    pub(crate) fn claim(&mut self, target: &LockTarget, timeout: Duration) -> StoreResult<()> {
        let held = self
            .guards
            .iter()
            .any(|guard| guard.path == target.lock_file && guard.mode >= target.mode);
        if held {
            return Ok(());
        }
        if let Some(guard) = LockGuard::acquire(target, timeout)? {
            self.guards.push(guard);
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.guards.len()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

#[cfg(unix)]
mod sys {
    use rustix::fs::{FlockOperation, flock};
    use rustix::io::Errno;
    use std::fs::File;

    use super::LockMode;

    /// Non-blocking attempt. `Ok(false)` when someone else holds it.
    pub(super) fn try_lock(file: &File, mode: LockMode) -> std::io::Result<bool> {
        let op = match mode {
            LockMode::Shared => FlockOperation::NonBlockingLockShared,
            LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
        };
        match flock(file, op) {
            Ok(()) => Ok(true),
            Err(e) if e == Errno::WOULDBLOCK || e == Errno::INTR => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn unlock(file: &File) -> std::io::Result<()> {
        flock(file, FlockOperation::Unlock).map_err(Into::into)
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;

    use super::LockMode;

    // advisory locking is only implemented on unix; elsewhere locks always succeed
    pub(super) fn try_lock(_file: &File, _mode: LockMode) -> std::io::Result<bool> {
        Ok(true)
    }

    pub(super) fn unlock(_file: &File) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    const SHORT: Duration = Duration::from_millis(30);

    fn target(dir: &Path, name: &str, mode: LockMode) -> LockTarget {
        LockTarget {
            lock_file: dir.join(name).join(".meta.lock"),
            node_path: format!("/{}", name),
            mode,
            provision: Provision::Always,
        }
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let a = LockSet::acquire(vec![target(dir.path(), "x", LockMode::Shared)], SHORT).unwrap();
        let b = LockSet::acquire(vec![target(dir.path(), "x", LockMode::Shared)], SHORT).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_exclusive_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let _held =
            LockSet::acquire(vec![target(dir.path(), "x", LockMode::Shared)], SHORT).unwrap();

        let started = Instant::now();
        let result = LockSet::acquire(vec![target(dir.path(), "x", LockMode::Exclusive)], SHORT);
        match result {
            Err(StoreError::LockTimeout { path, mode, .. }) => {
                assert_eq!(path, "/x");
                assert_eq!(mode, LockMode::Exclusive);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() >= SHORT);
    }

    #[test]
    fn test_release_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let held =
            LockSet::acquire(vec![target(dir.path(), "x", LockMode::Exclusive)], SHORT).unwrap();
        drop(held);
        assert!(
            LockSet::acquire(vec![target(dir.path(), "x", LockMode::Exclusive)], SHORT).is_ok()
        );
    }

    #[test]
    fn test_duplicates_locked_once() {
        let dir = tempfile::tempdir().unwrap();
        let set = LockSet::acquire(
            vec![
                target(dir.path(), "b", LockMode::Shared),
                target(dir.path(), "a", LockMode::Exclusive),
                target(dir.path(), "b", LockMode::Exclusive),
            ],
            SHORT,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_partial_failure_releases_taken_locks() {
        let dir = tempfile::tempdir().unwrap();
        let _blocker =
            LockSet::acquire(vec![target(dir.path(), "b", LockMode::Exclusive)], SHORT).unwrap();

        let result = LockSet::acquire(
            vec![
                target(dir.path(), "a", LockMode::Exclusive),
                target(dir.path(), "b", LockMode::Exclusive),
            ],
            SHORT,
        );
        assert!(result.is_err());
        // "a" was taken first and must be free again
        assert!(
            LockSet::acquire(vec![target(dir.path(), "a", LockMode::Exclusive)], SHORT).is_ok()
        );
    }

    #[test]
    fn test_threads_exclude_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let held = LockSet::acquire(vec![target(&path, "x", LockMode::Exclusive)], SHORT).unwrap();

        let handle = std::thread::spawn(move || {
            LockSet::acquire(
                vec![target(&path, "x", LockMode::Shared)],
                Duration::from_secs(2),
            )
            .map(|set| set.len())
        });
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_takes_stronger_mode() {
        let dir = tempfile::tempdir().unwrap();
        let _held = LockSet::acquire(
            vec![
                target(dir.path(), "x", LockMode::Shared),
                target(dir.path(), "x", LockMode::Exclusive),
            ],
            SHORT,
        )
        .unwrap();
        assert!(LockSet::acquire(vec![target(dir.path(), "x", LockMode::Shared)], SHORT).is_err());
    }

    #[test]
    fn test_missing_node_is_not_provisioned() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LockTarget {
            provision: Provision::WhileExists(dir.path().join("content/x")),
            ..target(dir.path(), "x", LockMode::Exclusive)
        };
        let set = LockSet::acquire(vec![missing.clone()], SHORT).unwrap();
        assert_eq!(set.len(), 0);
        assert!(!dir.path().join("x").exists());

        std::fs::create_dir(dir.path().join("content")).unwrap();
        std::fs::write(dir.path().join("content/x"), "").unwrap();
        let set = LockSet::acquire(vec![missing], SHORT).unwrap();
        assert_eq!(set.len(), 1);
        assert!(dir.path().join("x/.meta.lock").is_file());
    }
}
