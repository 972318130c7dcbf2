//! JSON sidecar records.
//!
//! Each node owns one metadata and one permission sidecar, stored in trees
//! parallel to the content tree. A [`Sidecar`] loads its record on first
//! access and only writes it back on [`Sidecar::save`]; nothing is
//! persisted implicitly.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreResult;
use crate::workspace::Workspace;

/// Sidecar file of one node.
#[derive(Debug)]
pub(crate) struct Sidecar<T> {
    workspace: Workspace,
    file_path: PathBuf,
    data: Option<T>,
}

impl<T> Sidecar<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(workspace: Workspace, file_path: PathBuf) -> Self {
        Self {
            workspace,
            file_path,
            data: None,
        }
    }

    /// Read and decode the sidecar, `None` when it does not exist.
    pub(crate) fn load(&self) -> StoreResult<Option<T>> {
        let encoded = match std::fs::read(&self.file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let json = self.workspace.attachment_transforms().decode(&encoded)?;
        Ok(Some(serde_json::from_slice(&json)?))
    }

    /// Cached record, loading it or falling back to `initial` on first use.
    pub(crate) fn data_or_init(
        &mut self,
        initial: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<&mut T> {
        let data = match self.data.take() {
            Some(data) => data,
            None => match self.load()? {
                Some(data) => data,
                None => initial()?,
            },
        };
        Ok(self.data.insert(data))
    }

    /// Replace the cached record without writing it.
    pub(crate) fn set(&mut self, data: T) {
        self.data = Some(data);
    }

    /// Encode and write the cached record, then stage it.
    ///
    /// Does nothing if the record was never loaded.
    pub(crate) fn save(&mut self) -> StoreResult<()> {
        let Some(data) = self.data.as_ref() else {
            return Ok(());
        };
        let json = if self.workspace.config().pretty_json {
            serde_json::to_vec_pretty(data)?
        } else {
            serde_json::to_vec(data)?
        };
        let encoded = self.workspace.attachment_transforms().encode(&json)?;
        if let Some(dir) = self.file_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.file_path, encoded)?;
        self.workspace.stage(&[self.file_path.clone()])?;
        Ok(())
    }

    /// Forget the cached record; the next access reads the disk again.
    pub(crate) fn reload(&mut self) {
        self.data = None;
    }

    /// Remove the sidecar, or the whole sidecar directory of a directory
    /// node, and unstage it.
    pub(crate) fn delete(&mut self, directory: bool) -> StoreResult<()> {
        self.data = None;
        if directory {
            let Some(dir) = self.file_path.parent().map(Path::to_path_buf) else {
                return Ok(());
            };
            remove_if_present(std::fs::remove_dir_all(&dir))?;
            self.workspace.unstage(&[dir], true)?;
        } else {
            remove_if_present(std::fs::remove_file(&self.file_path))?;
            self.workspace.unstage(&[self.file_path.clone()], false)?;
        }
        Ok(())
    }
}

fn remove_if_present(result: std::io::Result<()>) -> StoreResult<()> {
    match result {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
