//! Single-instance run lock.
//!
//! Only one backup or restore may run at a time system-wide. The lock is a
//! non-blocking exclusive flock on a well-known file; a second invocation
//! fails fast with `Busy` instead of queueing. The kernel drops the lock on
//! process exit, so a crashed run never wedges the next one.

use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

use crate::utils::errors::{EngineError, Result};

pub struct RunLock {
    _lock: Flock<File>,
}

impl RunLock {
    /// Acquire the exclusive run lock, failing fast with `Busy` when another
    /// backup or restore holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = %path.display(), "Acquired run lock");
                Ok(Self { _lock: lock })
            }
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Err(EngineError::Busy),
            Err((_, errno)) => Err(EngineError::Io(std::io::Error::from(errno))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");

        let held = RunLock::acquire(&path).unwrap();
        assert!(matches!(RunLock::acquire(&path), Err(EngineError::Busy)));

        drop(held);
        RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/run.lock");
        RunLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
