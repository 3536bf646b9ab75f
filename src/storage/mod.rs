//! Storage backends for backup artifacts.
//!
//! The backend is selected once from configuration and injected into both
//! the snapshot producer and the restore orchestrator. Both variants honor
//! the same contract: atomic `put`, unordered `list`, `NotFound` on a
//! missing fetch, and idempotent `delete`.

pub mod local;
pub mod sftp;

use std::path::Path;

use crate::config::{Config, StorageKind};
use crate::utils::errors::{EngineError, Result};
use local::LocalStorage;
use sftp::SftpStorage;

pub enum StorageBackend {
    Local(LocalStorage),
    Sftp(SftpStorage),
}

impl StorageBackend {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.storage.kind {
            StorageKind::Local => Ok(StorageBackend::Local(LocalStorage::new(
                config.storage.local.directory.clone(),
            ))),
            StorageKind::Remote => {
                let remote = config.storage.remote.clone().ok_or_else(|| {
                    EngineError::Config(
                        "storage.kind = \"remote\" requires a [storage.remote] section".into(),
                    )
                })?;
                Ok(StorageBackend::Sftp(SftpStorage::new(remote)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StorageBackend::Local(s) => s.describe(),
            StorageBackend::Sftp(s) => s.describe(),
        }
    }

    pub async fn put(&self, local_file: &Path, artifact_name: &str) -> Result<()> {
        match self {
            StorageBackend::Local(s) => s.put(local_file, artifact_name).await,
            StorageBackend::Sftp(s) => s.put(local_file, artifact_name).await,
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        match self {
            StorageBackend::Local(s) => s.list().await,
            StorageBackend::Sftp(s) => s.list().await,
        }
    }

    pub async fn fetch(&self, artifact_name: &str, dest: &Path) -> Result<()> {
        match self {
            StorageBackend::Local(s) => s.fetch(artifact_name, dest).await,
            StorageBackend::Sftp(s) => s.fetch(artifact_name, dest).await,
        }
    }

    pub async fn delete(&self, artifact_name: &str) -> Result<()> {
        match self {
            StorageBackend::Local(s) => s.delete(artifact_name).await,
            StorageBackend::Sftp(s) => s.delete(artifact_name).await,
        }
    }
}
