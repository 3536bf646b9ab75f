//! Ephemeral staging areas for backup and restore runs.
//!
//! Each invocation gets a fresh, exclusively-owned working directory that is
//! removed on every exit path. Leftovers from interrupted runs are swept at
//! the next startup.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::errors::Result;

const STAGING_PREFIX: &str = "run-";

pub struct StagingArea {
    path: PathBuf,
}

impl StagingArea {
    /// Create a fresh working directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let name = format!(
            "{}{}-{}",
            STAGING_PREFIX,
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            std::process::id()
        );
        let path = root.join(name);
        std::fs::create_dir(&path)?;
        debug!(path = %path.display(), "Created staging area");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove stale staging directories left behind by interrupted runs.
    pub fn sweep(root: &Path) {
        let Ok(entries) = std::fs::read_dir(root) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => debug!(path = %entry.path().display(), "Swept stale staging area"),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to sweep stale staging area")
                }
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove staging area");
            }
        }
    }
}
