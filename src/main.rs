//! pbx-backup - Main entry point
//!
//! Unattended backup/restore controller for the telephony platform.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pbx_backup::backup::SnapshotProducer;
use pbx_backup::catalog;
use pbx_backup::config::Config;
use pbx_backup::exec::SystemRunner;
use pbx_backup::lock::RunLock;
use pbx_backup::restore::{self, RestoreOptions, RestoreOrchestrator};
use pbx_backup::staging::StagingArea;
use pbx_backup::storage::StorageBackend;
use pbx_backup::utils;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/pbx-backup/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture the platform configuration and database into a new artifact
    Backup,

    /// Replay a stored artifact onto this host
    Restore {
        /// Artifact name, as shown by `list`
        artifact: String,

        /// Take the database encryption key from the artifact instead of
        /// keeping the live one
        #[arg(long)]
        archive_key: bool,

        /// Set the firewall enable flag to "no" after restoring
        #[arg(long)]
        disable_firewall: bool,

        /// Skip the post-restore reboot
        #[arg(long)]
        no_reboot: bool,

        /// Seconds before the post-restore reboot; Enter cancels
        #[arg(long, default_value_t = 30)]
        reboot_delay: u64,
    },

    /// List stored artifacts, newest first
    List,

    /// Delete artifacts older than the retention window
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;
    utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        instance_type = %config.instance_type,
        server_name = %config.server_name,
        "Starting pbx-backup"
    );

    let backend = StorageBackend::from_config(&config)?;

    match args.command {
        Command::Backup => {
            let _lock = RunLock::acquire(&config.platform.lock_file)?;
            StagingArea::sweep(&config.platform.staging_root);

            let runner = SystemRunner;
            let producer = SnapshotProducer::new(&config, &backend, &runner);
            let artifact = producer.run(chrono::Local::now().naive_local()).await?;
            println!("{}", artifact.name());
        }

        Command::Restore {
            artifact,
            archive_key,
            disable_firewall,
            no_reboot,
            reboot_delay,
        } => {
            let _lock = RunLock::acquire(&config.platform.lock_file)?;
            StagingArea::sweep(&config.platform.staging_root);

            let runner = SystemRunner;
            let options = RestoreOptions {
                preserve_encryption_key: !archive_key,
                disable_firewall,
            };
            let mut orchestrator =
                RestoreOrchestrator::new(&config, &backend, &runner, options);
            orchestrator.execute(&artifact).await?;

            println!("Restore of {artifact} complete");
            if !no_reboot {
                restore::reboot_countdown(
                    &runner,
                    reboot_delay,
                    &config.platform.reboot_command,
                )
                .await?;
            }
        }

        Command::List => {
            for (name, artifact) in catalog::list_artifacts(&backend).await? {
                println!(
                    "{name}  {}  {}",
                    artifact.instance_type,
                    artifact.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Command::Prune => {
            let _lock = RunLock::acquire(&config.platform.lock_file)?;
            let deleted = catalog::apply_retention(
                &backend,
                config.retention_days,
                chrono::Local::now().naive_local(),
            )
            .await?;
            println!("Deleted {deleted} expired artifact(s)");
        }
    }

    Ok(())
}
