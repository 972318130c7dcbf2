//! Pass-through backend with no history.

use std::path::{Path, PathBuf};

use crate::{Snapshot, VcsError, VcsResult, VersionControl};

/// Backend that records nothing.
///
/// `commit` and `rollback` succeed without effect, so a failed operation
/// leaves whatever partial filesystem state existed when it failed.
#[derive(Debug, Clone, Default)]
pub struct NoopBackend;

impl VersionControl for NoopBackend {
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

    fn commit(&self, _message: &str) -> VcsResult<()> {
        Ok(())
    }

    fn rollback(&self) -> VcsResult<()> {
        Ok(())
    }

    fn read(&self, path: &Path, revision: &str) -> VcsResult<Snapshot> {
        Err(VcsError::invalid_revision(
            path.display().to_string(),
            revision,
        ))
    }

    fn revisions(&self, _path: &Path) -> VcsResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_has_no_history() {
        let backend = NoopBackend;
        backend.init().unwrap();
        backend.add(&[PathBuf::from("/tmp/x")]).unwrap();
        backend.commit("anything").unwrap();
        assert!(backend.revisions(Path::new("/tmp/x")).unwrap().is_empty());
        assert!(matches!(
            backend.read(Path::new("/tmp/x"), "HEAD"),
            Err(VcsError::InvalidRevision { .. })
        ));
        assert_eq!(backend.placeholder_name(), None);
        assert!(backend.reserved_names().is_empty());
    }
}
