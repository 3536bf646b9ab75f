//! Restore orchestrator: replay a stored artifact onto this host.
//!
//! The restore is a linear state machine with a hard safety boundary. Up to
//! and including extraction, nothing on the host is touched and any failure
//! aborts cleanly. From the moment the live configuration tree is
//! overwritten, every failure is wrapped in `ManualIntervention` naming the
//! last completed state; there is no automatic rollback.
//!
//! Host identity survives the restore: the network-identity file is never
//! copied out of the archive, and the live database encryption key is
//! carried across by default so the restored dump stays decryptable.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use crate::archive;
use crate::backup::{CONFIG_SUBDIR, DUMP_FILENAME};
use crate::config::Config;
use crate::exec::CommandRunner;
use crate::fields;
use crate::fsops;
use crate::staging::StagingArea;
use crate::storage::StorageBackend;
use crate::utils::errors::{EngineError, Result};

const STATE_MARKER: &str = "restore-state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreState {
    Idle,
    KeyExtracted,
    Downloaded,
    Extracted,
    ConfigRestored,
    KeyRestored,
    FirewallConfigured,
    Stage1Applied,
    DatabaseRestored,
    Stage2Applied,
    CleanedUp,
    Done,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreState::Idle => "idle",
            RestoreState::KeyExtracted => "key-extracted",
            RestoreState::Downloaded => "downloaded",
            RestoreState::Extracted => "extracted",
            RestoreState::ConfigRestored => "config-restored",
            RestoreState::KeyRestored => "key-restored",
            RestoreState::FirewallConfigured => "firewall-configured",
            RestoreState::Stage1Applied => "stage1-applied",
            RestoreState::DatabaseRestored => "database-restored",
            RestoreState::Stage2Applied => "stage2-applied",
            RestoreState::CleanedUp => "cleaned-up",
            RestoreState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Keep the live database encryption key instead of the archived one.
    pub preserve_encryption_key: bool,
    /// Force the firewall-enable flag to `no` after restoring.
    pub disable_firewall: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            preserve_encryption_key: true,
            disable_firewall: false,
        }
    }
}

/// Progress marker written into the staging area before each transition, so
/// an operator can see how far an interrupted restore got.
#[derive(Serialize)]
struct StateMarker<'a> {
    state: RestoreState,
    artifact: &'a str,
    at: String,
}

pub struct RestoreOrchestrator<'a, R: CommandRunner> {
    config: &'a Config,
    backend: &'a StorageBackend,
    runner: &'a R,
    options: RestoreOptions,
    state: RestoreState,
}

impl<'a, R: CommandRunner> RestoreOrchestrator<'a, R> {
    pub fn new(
        config: &'a Config,
        backend: &'a StorageBackend,
        runner: &'a R,
        options: RestoreOptions,
    ) -> Self {
        Self {
            config,
            backend,
            runner,
            options,
            state: RestoreState::Idle,
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Run the full restore of `artifact_name`.
    pub async fn execute(&mut self, artifact_name: &str) -> Result<()> {
        info!(
            artifact = artifact_name,
            backend = %self.backend.describe(),
            preserve_encryption_key = self.options.preserve_encryption_key,
            disable_firewall = self.options.disable_firewall,
            "Starting restore"
        );

        let staging = StagingArea::create(&self.config.platform.staging_root)?;

        // Safe phase: the host is untouched until step 4.
        let live_key = if self.options.preserve_encryption_key {
            let key = self.extract_live_key()?;
            self.transition(RestoreState::KeyExtracted, artifact_name, staging.path());
            Some(key)
        } else {
            None
        };

        let archive_path = staging.path().join(artifact_name);
        self.backend.fetch(artifact_name, &archive_path).await?;
        self.transition(RestoreState::Downloaded, artifact_name, staging.path());

        let extracted = staging.path().join("extracted");
        archive::unpack(&archive_path, &extracted, &HashSet::new())?;
        self.verify_layout(&extracted)?;
        self.transition(RestoreState::Extracted, artifact_name, staging.path());

        // Destructive phase: from here on a failure leaves the host in a
        // mixed state and requires an operator.
        self.restore_config_tree(&extracted)
            .map_err(|e| self.manual(e))?;
        self.transition(RestoreState::ConfigRestored, artifact_name, staging.path());

        if let Some(key) = live_key {
            self.write_key_back(&key).map_err(|e| self.manual(e))?;
            self.transition(RestoreState::KeyRestored, artifact_name, staging.path());
        }

        if self.options.disable_firewall {
            self.disable_firewall().map_err(|e| self.manual(e))?;
            self.transition(
                RestoreState::FirewallConfigured,
                artifact_name,
                staging.path(),
            );
        }

        self.apply_stage("pre-database")
            .await
            .map_err(|e| self.manual(e))?;
        self.transition(RestoreState::Stage1Applied, artifact_name, staging.path());

        self.replay_database(&extracted.join(DUMP_FILENAME))
            .await
            .map_err(|e| self.manual(e))?;
        self.transition(RestoreState::DatabaseRestored, artifact_name, staging.path());

        self.apply_stage("post-database")
            .await
            .map_err(|e| self.manual(e))?;
        self.transition(RestoreState::Stage2Applied, artifact_name, staging.path());

        drop(staging);
        self.state = RestoreState::CleanedUp;
        info!(state = %self.state, "Removed restore staging area");

        self.state = RestoreState::Done;
        info!(artifact = artifact_name, "Restore complete");
        Ok(())
    }

    fn transition(&mut self, next: RestoreState, artifact: &str, staging: &Path) {
        info!(from = %self.state, to = %next, "Restore state transition");
        self.state = next;

        let marker = StateMarker {
            state: next,
            artifact,
            at: chrono::Local::now().to_rfc3339(),
        };
        // Inspection aid only; a failed write must not fail the restore.
        match serde_json::to_vec_pretty(&marker) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(staging.join(STATE_MARKER), bytes) {
                    warn!(error = %e, "Failed to write restore state marker");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode restore state marker"),
        }
    }

    fn manual(&self, source: EngineError) -> EngineError {
        EngineError::ManualIntervention {
            completed: self.state.to_string(),
            source: Box::new(source),
        }
    }

    fn extract_live_key(&self) -> Result<String> {
        let path = self.config.constants_file_path();
        let doc = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Field(format!("cannot read {}: {e}", path.display()))
        })?;
        let key = fields::read_field(&doc, &self.config.platform.encryption_key_path)?;
        info!("Extracted live database encryption key");
        Ok(key)
    }

    fn verify_layout(&self, extracted: &Path) -> Result<()> {
        if !extracted.join(CONFIG_SUBDIR).is_dir() {
            return Err(EngineError::Archive(format!(
                "artifact has no {CONFIG_SUBDIR}/ tree"
            )));
        }
        if !extracted.join(DUMP_FILENAME).is_file() {
            return Err(EngineError::Archive(format!(
                "artifact has no {DUMP_FILENAME}"
            )));
        }
        Ok(())
    }

    /// Copy the archived tree over the live one. The network-identity file
    /// keeps this host addressable and is never taken from the archive.
    fn restore_config_tree(&self, extracted: &Path) -> Result<()> {
        let exclude: HashSet<PathBuf> =
            [PathBuf::from(&self.config.platform.network_file)].into();
        let copied = fsops::copy_tree(
            &extracted.join(CONFIG_SUBDIR),
            &self.config.platform.config_dir,
            &exclude,
        )
        .map_err(|e| EngineError::ConfigCopy(e.to_string()))?;
        info!(
            files = copied,
            excluded = %self.config.platform.network_file,
            "Restored platform configuration tree"
        );
        Ok(())
    }

    fn write_key_back(&self, key: &str) -> Result<()> {
        let path = self.config.constants_file_path();
        let doc = std::fs::read_to_string(&path)?;
        let updated = fields::set_field(&doc, &self.config.platform.encryption_key_path, key)?;
        std::fs::write(&path, updated)?;
        info!("Restored live database encryption key");
        Ok(())
    }

    fn disable_firewall(&self) -> Result<()> {
        let path = self.config.main_file_path();
        let doc = std::fs::read_to_string(&path)?;

        let current = fields::read_field(&doc, &self.config.platform.firewall_enable_path)?;
        if current != "yes" && current != "no" {
            return Err(EngineError::Field(format!(
                "unexpected firewall enable value: {current}"
            )));
        }

        let updated = fields::set_field(&doc, &self.config.platform.firewall_enable_path, "no")?;
        std::fs::write(&path, updated)?;
        info!(previous = %current, "Disabled firewall in platform configuration");
        Ok(())
    }

    async fn apply_stage(&self, stage: &str) -> Result<()> {
        let output = self
            .runner
            .run(&self.config.platform.apply_command, &[stage.to_string()])
            .await?;
        if !output.success() {
            return Err(EngineError::Apply(format!(
                "{} {stage} exited with status {}: {}",
                self.config.platform.apply_command,
                output.status,
                output.stderr.trim()
            )));
        }
        info!(stage, "Applied platform configuration");
        Ok(())
    }

    async fn replay_database(&self, dump: &Path) -> Result<()> {
        let mysql = &self.config.mysql;
        let args = vec![
            format!("--host={}", mysql.host),
            format!("--user={}", mysql.user),
            format!("--password={}", mysql.password),
        ];

        let output = self
            .runner
            .run_with_stdin(&self.config.platform.mysql_command, &args, dump)
            .await?;
        if !output.success() {
            return Err(EngineError::DatabaseRestore(format!(
                "{} exited with status {}: {}",
                self.config.platform.mysql_command,
                output.status,
                output.stderr.trim()
            )));
        }
        info!("Replayed database dump");
        Ok(())
    }
}

/// Count down `delay_secs`, then issue the reboot command. Pressing Enter
/// before the countdown elapses cancels the reboot and nothing else.
/// Returns whether the reboot command was issued.
pub async fn reboot_countdown<R: CommandRunner>(
    runner: &R,
    delay_secs: u64,
    reboot_command: &str,
) -> Result<bool> {
    let mut parts = reboot_command.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(EngineError::Command("empty reboot command".into()));
    };
    let args: Vec<String> = parts.map(str::to_string).collect();

    info!(delay_secs, "Rebooting to finalize restore; press Enter to cancel");

    let sleep = tokio::time::sleep(std::time::Duration::from_secs(delay_secs));
    tokio::pin!(sleep);
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    // A closed stdin (unattended run) must not count as a cancellation.
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = &mut sleep => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    info!("Reboot cancelled by operator");
                    return Ok(false);
                }
                _ => stdin_open = false,
            },
        }
    }

    let output = runner.run(program, &args).await?;
    if !output.success() {
        return Err(EngineError::Command(format!(
            "{reboot_command} exited with status {}",
            output.status
        )));
    }
    Ok(true)
}
