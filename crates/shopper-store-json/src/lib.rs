use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use shopper_core::Dataset;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("shopping dataset is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Durable container for the full [`Dataset`]: one pretty-printed JSON
/// artifact holding the three collections, always read and written whole.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the complete dataset. A missing artifact reads as an empty
    /// dataset, never as an error.
    ///
    /// # Errors
    /// Returns [`StoreError::Corrupt`] when the artifact exists but cannot
    /// be parsed, or [`StoreError::Io`] when it cannot be read.
    pub fn load(&self) -> Result<Dataset, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Dataset::default()),
            Err(err) => return Err(StoreError::Io(err)),
        };
        serde_json::from_str(&raw).map_err(StoreError::Corrupt)
    }

    /// Persist the complete dataset, replacing prior content. The parent
    /// directory is created on first use, and the artifact is written to a
    /// sibling temp file and renamed into place so a reader never observes
    /// a partial dataset.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the medium is unwritable.
    pub fn store(&self, dataset: &Dataset) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let json = serde_json::to_vec_pretty(dataset)
            .map_err(|err| StoreError::Io(std::io::Error::from(err)))?;

        let staging = self.staging_path();
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}
