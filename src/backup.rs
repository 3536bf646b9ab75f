//! Snapshot producer: capture the live system into a stored artifact.
//!
//! One run stages the platform configuration tree and a full logical
//! database dump, packs them into a single archive, and uploads it to the
//! configured backend. Nothing is uploaded unless both captures succeed,
//! so every stored artifact is complete by construction.

use std::collections::HashSet;
use tracing::{info, warn};

use crate::archive;
use crate::catalog::{self, BackupArtifact};
use crate::config::Config;
use crate::exec::CommandRunner;
use crate::fsops;
use crate::staging::StagingArea;
use crate::storage::StorageBackend;
use crate::utils::errors::{EngineError, Result};

/// Name of the configuration tree inside every archive.
pub const CONFIG_SUBDIR: &str = "platform-config";

/// Name of the database dump inside every archive.
pub const DUMP_FILENAME: &str = "database.sql";

pub struct SnapshotProducer<'a, R: CommandRunner> {
    config: &'a Config,
    backend: &'a StorageBackend,
    runner: &'a R,
}

impl<'a, R: CommandRunner> SnapshotProducer<'a, R> {
    pub fn new(config: &'a Config, backend: &'a StorageBackend, runner: &'a R) -> Self {
        Self {
            config,
            backend,
            runner,
        }
    }

    /// Produce and store one snapshot stamped with `now`, then prune
    /// expired artifacts. The staging area is removed on every exit path.
    pub async fn run(&self, now: chrono::NaiveDateTime) -> Result<BackupArtifact> {
        let artifact = BackupArtifact::new(
            &self.config.server_name,
            self.config.instance_type,
            now,
        )?;
        info!(artifact = %artifact.name(), backend = %self.backend.describe(), "Starting backup");

        let staging = StagingArea::create(&self.config.platform.staging_root)?;
        self.produce(&staging, &artifact).await?;
        drop(staging);

        // The new artifact is already safe; a failed prune only delays
        // cleanup until the next run.
        if let Err(e) =
            catalog::apply_retention(self.backend, self.config.retention_days, artifact.created_at)
                .await
        {
            warn!(error = %e, "Retention pass failed");
        }

        info!(artifact = %artifact.name(), "Backup complete");
        Ok(artifact)
    }

    async fn produce(&self, staging: &StagingArea, artifact: &BackupArtifact) -> Result<()> {
        let snapshot = staging.path().join("snapshot");

        let copied = fsops::copy_tree(
            &self.config.platform.config_dir,
            &snapshot.join(CONFIG_SUBDIR),
            &HashSet::new(),
        )
        .map_err(|e| EngineError::ConfigCopy(e.to_string()))?;
        info!(files = copied, "Captured platform configuration tree");

        self.dump_database(&snapshot).await?;

        let archive_path = staging.path().join(artifact.name());
        archive::pack(&snapshot, &archive_path)?;

        self.backend.put(&archive_path, &artifact.name()).await
    }

    async fn dump_database(&self, snapshot: &std::path::Path) -> Result<()> {
        let mysql = &self.config.mysql;
        let args = vec![
            "--all-databases".to_string(),
            "--routines".to_string(),
            "--triggers".to_string(),
            "--events".to_string(),
            format!("--host={}", mysql.host),
            format!("--user={}", mysql.user),
            format!("--password={}", mysql.password),
        ];

        // The dump can exceed memory; it is streamed straight to disk.
        let dump_path = snapshot.join(DUMP_FILENAME);
        let output = self
            .runner
            .run_to_file(&self.config.platform.mysqldump_command, &args, &dump_path)
            .await?;
        if !output.success() {
            return Err(EngineError::Dump(format!(
                "{} exited with status {}: {}",
                self.config.platform.mysqldump_command,
                output.status,
                output.stderr.trim()
            )));
        }

        let bytes = std::fs::metadata(&dump_path)?.len();
        info!(bytes, "Captured database dump");
        Ok(())
    }
}
