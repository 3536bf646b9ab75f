//! Remote SFTP storage backend.
//!
//! One session per call: connect, authenticate, operate, disconnect. Every
//! transport failure surfaces as a `Storage` error; the engine never retries
//! on its own, so a transient network failure during a restore is visible
//! immediately instead of masking a half-applied state.

use ssh2::Session;
use std::fs::File;
use std::net::TcpStream;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::archive::ARCHIVE_EXTENSION;
use crate::config::RemoteStorageConfig;
use crate::utils::errors::{EngineError, Result};

fn storage_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(e.to_string())
}

pub struct SftpStorage {
    config: RemoteStorageConfig,
}

impl SftpStorage {
    pub fn new(config: RemoteStorageConfig) -> Self {
        Self { config }
    }

    pub fn describe(&self) -> String {
        format!(
            "sftp://{}:{}{}",
            self.config.host, self.config.port, self.config.directory
        )
    }

    fn connect(cfg: &RemoteStorageConfig) -> Result<(Session, ssh2::Sftp)> {
        debug!(host = %cfg.host, port = cfg.port, "Connecting to SFTP storage");
        let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).map_err(storage_err)?;
        let mut sess = Session::new().map_err(storage_err)?;
        sess.set_tcp_stream(tcp);
        sess.handshake().map_err(storage_err)?;
        sess.userauth_password(&cfg.username, &cfg.password)
            .map_err(|e| EngineError::Storage(format!("SFTP authentication failed: {e}")))?;
        if !sess.authenticated() {
            return Err(EngineError::Storage("SFTP authentication failed".into()));
        }

        let sftp = sess.sftp().map_err(storage_err)?;
        let dir = Path::new(&cfg.directory);
        if sftp.stat(dir).is_err() {
            Self::mkdirs(&sftp, dir)?;
        }
        Ok((sess, sftp))
    }

    fn mkdirs(sftp: &ssh2::Sftp, dir: &Path) -> Result<()> {
        let mut current = PathBuf::from("/");
        for comp in dir.components() {
            if let Component::Normal(part) = comp {
                current.push(part);
                if sftp.stat(&current).is_err() {
                    sftp.mkdir(&current, 0o755).map_err(storage_err)?;
                }
            }
        }
        Ok(())
    }

    /// Upload under a `.part` name, then rename into place so a listing
    /// never observes a partial artifact.
    pub async fn put(&self, local_file: &Path, artifact_name: &str) -> Result<()> {
        let cfg = self.config.clone();
        let src = local_file.to_path_buf();
        let name = artifact_name.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let (_sess, sftp) = Self::connect(&cfg)?;
            let mut local = File::open(&src).map_err(storage_err)?;

            let dir = Path::new(&cfg.directory);
            let part = dir.join(format!("{name}.part"));
            let dest = dir.join(&name);

            // Streamed; the artifact never has to fit in memory.
            let mut remote = sftp.create(&part).map_err(storage_err)?;
            let bytes = std::io::copy(&mut local, &mut remote).map_err(storage_err)?;
            drop(remote);

            // rename refuses to clobber; an existing same-named artifact is
            // replaced deliberately.
            let _ = sftp.unlink(&dest);
            sftp.rename(&part, &dest, None).map_err(storage_err)?;
            debug!(artifact = %name, bytes, "Uploaded artifact to SFTP storage");
            Ok(())
        })
        .await
        .map_err(storage_err)?
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let cfg = self.config.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let (_sess, sftp) = Self::connect(&cfg)?;
            let entries = sftp
                .readdir(Path::new(&cfg.directory))
                .map_err(storage_err)?;

            let mut names = Vec::new();
            for (path, _stat) in entries {
                if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                    if name.ends_with(ARCHIVE_EXTENSION) {
                        names.push(name);
                    }
                }
            }
            Ok(names)
        })
        .await
        .map_err(storage_err)?
    }

    pub async fn fetch(&self, artifact_name: &str, dest: &Path) -> Result<()> {
        let cfg = self.config.clone();
        let name = artifact_name.to_string();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let (_sess, sftp) = Self::connect(&cfg)?;
            let remote_path = Path::new(&cfg.directory).join(&name);

            if sftp.stat(&remote_path).is_err() {
                return Err(EngineError::NotFound(name));
            }

            let mut remote = sftp.open(&remote_path).map_err(storage_err)?;
            let mut local = File::create(&dest).map_err(storage_err)?;
            let bytes = std::io::copy(&mut remote, &mut local).map_err(storage_err)?;
            debug!(artifact = %name, bytes, "Downloaded artifact from SFTP storage");
            Ok(())
        })
        .await
        .map_err(storage_err)?
    }

    /// Idempotent: deleting a missing artifact is not an error.
    pub async fn delete(&self, artifact_name: &str) -> Result<()> {
        let cfg = self.config.clone();
        let name = artifact_name.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let (_sess, sftp) = Self::connect(&cfg)?;
            let remote_path = Path::new(&cfg.directory).join(&name);

            if sftp.stat(&remote_path).is_err() {
                return Ok(());
            }
            sftp.unlink(&remote_path).map_err(storage_err)?;
            debug!(artifact = %name, "Deleted artifact from SFTP storage");
            Ok(())
        })
        .await
        .map_err(storage_err)?
    }
}
