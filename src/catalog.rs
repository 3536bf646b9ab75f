//! Artifact naming, parsing, and retention policy.
//!
//! An artifact name is a deterministic, round-trippable encoding of its
//! provenance: `{server}-{instance}-{HH-MM}_{DD-MM-YYYY}.tar.zst`. The
//! backend's listing is the catalog; there is no separate index.

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{info, warn};

use crate::archive::ARCHIVE_EXTENSION;
use crate::config::InstanceType;
use crate::storage::StorageBackend;
use crate::utils::errors::{EngineError, Result};

const TIMESTAMP_FORMAT: &str = "%H-%M_%d-%m-%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub server_name: String,
    pub instance_type: InstanceType,
    /// Minute precision; seconds are truncated at creation.
    pub created_at: NaiveDateTime,
}

impl BackupArtifact {
    /// Build an artifact identity. Server names containing the encoding
    /// separators are rejected here so every generated name parses back.
    pub fn new(
        server_name: &str,
        instance_type: InstanceType,
        created_at: NaiveDateTime,
    ) -> Result<Self> {
        if server_name.is_empty() || server_name.contains(['-', '_']) {
            return Err(EngineError::Parse(format!(
                "server name must be non-empty and free of '-' and '_': {server_name}"
            )));
        }
        let created_at = created_at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(created_at);
        Ok(Self {
            server_name: server_name.to_string(),
            instance_type,
            created_at,
        })
    }

    /// Canonical artifact name.
    pub fn name(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.server_name,
            self.instance_type,
            self.created_at.format(TIMESTAMP_FORMAT),
            ARCHIVE_EXTENSION
        )
    }

    /// Parse a canonical name back into its identity.
    pub fn parse(name: &str) -> Result<Self> {
        let stem = name
            .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
            .ok_or_else(|| EngineError::Parse(format!("unexpected extension: {name}")))?;

        // server-instance-HH-MM_DD-MM-YYYY
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() != 6 {
            return Err(EngineError::Parse(format!(
                "unexpected segment count: {name}"
            )));
        }

        let instance_type: InstanceType = parts[1].parse()?;
        let timestamp = parts[2..].join("-");
        let created_at = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| EngineError::Parse(format!("bad timestamp in {name}: {e}")))?;

        Self::new(parts[0], instance_type, created_at)
    }
}

/// Delete every parseable artifact strictly older than `retention_days`.
///
/// An artifact aged exactly `retention_days` is kept. Unparseable names are
/// logged and never deleted. Returns the number of deleted artifacts.
pub async fn apply_retention(
    backend: &StorageBackend,
    retention_days: u32,
    now: NaiveDateTime,
) -> Result<usize> {
    let cutoff = now - Duration::days(retention_days as i64);
    info!(retention_days, cutoff = %cutoff, "Applying retention policy");

    let mut deleted = 0usize;
    for name in backend.list().await? {
        let artifact = match BackupArtifact::parse(&name) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(name = %name, error = %e, "Skipping unparseable artifact");
                continue;
            }
        };
        if artifact.created_at < cutoff {
            info!(name = %name, created_at = %artifact.created_at, "Deleting expired artifact");
            backend.delete(&name).await?;
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!(deleted, "Retention pass complete");
    }
    Ok(deleted)
}

/// All parseable artifacts in the backend, newest first.
pub async fn list_artifacts(backend: &StorageBackend) -> Result<Vec<(String, BackupArtifact)>> {
    let mut artifacts = Vec::new();
    for name in backend.list().await? {
        match BackupArtifact::parse(&name) {
            Ok(artifact) => artifacts.push((name, artifact)),
            Err(e) => warn!(name = %name, error = %e, "Skipping unparseable artifact"),
        }
    }
    artifacts.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(artifacts)
}
