//! Local filesystem storage backend.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::archive::ARCHIVE_EXTENSION;
use crate::utils::errors::{EngineError, Result};

fn storage_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(e.to_string())
}

pub struct LocalStorage {
    directory: PathBuf,
}

impl LocalStorage {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn describe(&self) -> String {
        format!("local directory {}", self.directory.display())
    }

    /// Copy `local_file` into the storage directory under `artifact_name`.
    /// The copy lands under a `.part` name first and is renamed into place,
    /// so `list` never observes a partial artifact.
    pub async fn put(&self, local_file: &Path, artifact_name: &str) -> Result<()> {
        let dir = self.directory.clone();
        let src = local_file.to_path_buf();
        let name = artifact_name.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir).map_err(storage_err)?;
            let part = dir.join(format!("{name}.part"));
            let dest = dir.join(&name);
            std::fs::copy(&src, &part).map_err(storage_err)?;
            std::fs::rename(&part, &dest).map_err(storage_err)?;
            debug!(artifact = %name, dest = %dest.display(), "Stored artifact");
            Ok(())
        })
        .await
        .map_err(storage_err)?
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let dir = self.directory.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !dir.is_dir() {
                return Ok(Vec::new());
            }
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&dir).map_err(storage_err)? {
                let entry = entry.map_err(storage_err)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(ARCHIVE_EXTENSION) {
                    names.push(name);
                }
            }
            Ok(names)
        })
        .await
        .map_err(storage_err)?
    }

    pub async fn fetch(&self, artifact_name: &str, dest: &Path) -> Result<()> {
        let source = self.directory.join(artifact_name);
        let name = artifact_name.to_string();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if !source.is_file() {
                return Err(EngineError::NotFound(name));
            }
            std::fs::copy(&source, &dest).map_err(storage_err)?;
            debug!(artifact = %name, "Fetched artifact");
            Ok(())
        })
        .await
        .map_err(storage_err)?
    }

    /// Idempotent: deleting a missing artifact is not an error.
    pub async fn delete(&self, artifact_name: &str) -> Result<()> {
        let path = self.directory.join(artifact_name);
        let name = artifact_name.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(artifact = %name, "Deleted artifact");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(storage_err(e)),
            }
        })
        .await
        .map_err(storage_err)?
    }
}
