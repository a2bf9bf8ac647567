//! Durable session record store.
//!
//! One JSON file per persistent session. Writes go to a temporary file in
//! the same directory and are renamed into place with
//! `tempfile::NamedTempFile::persist()`, so a reader sees either the old or
//! the new record, never a partial one.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::record::SessionRecord;
use crate::{AppError, Result};

/// Reader/writer for the session record file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read, and
    /// `AppError::State` if it does not hold a valid record.
    pub fn load(&self) -> Result<Option<SessionRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to read session record {}: {err}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_str(&raw).map(Some).map_err(|err| {
            AppError::State(format!(
                "session record {} is corrupt ({err}); remove it and start again",
                self.path.display()
            ))
        })
    }

    /// Atomically replace the record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the temporary file cannot be written or
    /// renamed into place.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|err| {
            AppError::Io(format!(
                "failed to create directory {}: {err}",
                parent.display()
            ))
        })?;

        let body = serde_json::to_vec_pretty(record)
            .map_err(|err| AppError::Io(format!("failed to serialise session record: {err}")))?;

        let mut tmp = NamedTempFile::new_in(&parent)
            .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
        tmp.write_all(&body)
            .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;
        tmp.persist(&self.path).map_err(|err| {
            AppError::Io(format!(
                "failed to persist session record to {}: {err}",
                self.path.display()
            ))
        })?;

        debug!(path = %self.path.display(), "session record written");
        Ok(())
    }

    /// Remove the record. Removing a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be removed.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "session record removed");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(format!(
                "failed to remove session record {}: {err}",
                self.path.display()
            ))),
        }
    }
}
