//! Configuration management for the backup controller.
//!
//! Loads configuration from a TOML file. The configuration is read once at
//! startup and shared read-only by all components; nothing re-reads it
//! mid-operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::utils::errors::{EngineError, Result};

/// Role of this host in the master/DR pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Master,
    Dr,
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceType::Master => write!(f, "master"),
            InstanceType::Dr => write!(f, "dr"),
        }
    }
}

impl FromStr for InstanceType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(InstanceType::Master),
            "dr" => Ok(InstanceType::Dr),
            other => Err(EngineError::Parse(format!("unknown instance type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub instance_type: InstanceType,

    /// Host label encoded into artifact names. Must not contain the name
    /// separator characters `-` or `_`.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Artifacts strictly older than this many days are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    pub storage: StorageConfig,

    #[serde(default)]
    pub mysql: MysqlConfig,

    #[serde(default)]
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub kind: StorageKind,

    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Required when `kind = "remote"`.
    #[serde(default)]
    pub remote: Option<RemoteStorageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_directory")]
    pub directory: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            directory: default_local_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStorageConfig {
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_remote_directory")]
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    #[serde(default = "default_mysql_host")]
    pub host: String,

    #[serde(default = "default_mysql_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: default_mysql_host(),
            user: default_mysql_user(),
            password: String::new(),
        }
    }
}

/// Well-known paths and tool names of the telephony platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Live configuration tree captured by every backup.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Network-identity file (relative to `config_dir`). Never overwritten
    /// by a restore.
    #[serde(default = "default_network_file")]
    pub network_file: String,

    /// File (relative to `config_dir`) holding the database encryption key.
    #[serde(default = "default_constants_file")]
    pub constants_file: String,

    /// Main platform configuration file (relative to `config_dir`).
    #[serde(default = "default_main_file")]
    pub main_file: String,

    /// Key path of the database encryption key inside `constants_file`.
    #[serde(default = "default_encryption_key_path")]
    pub encryption_key_path: String,

    /// Key path of the firewall enable flag inside `main_file`.
    #[serde(default = "default_firewall_enable_path")]
    pub firewall_enable_path: String,

    /// Configuration-apply tool, invoked in pre- and post-database mode.
    #[serde(default = "default_apply_command")]
    pub apply_command: String,

    #[serde(default = "default_mysqldump_command")]
    pub mysqldump_command: String,

    #[serde(default = "default_mysql_command")]
    pub mysql_command: String,

    /// Command line issued when the post-restore countdown elapses.
    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,

    /// Root for per-run staging areas.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Lock file guarding against concurrent backup/restore runs.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            network_file: default_network_file(),
            constants_file: default_constants_file(),
            main_file: default_main_file(),
            encryption_key_path: default_encryption_key_path(),
            firewall_enable_path: default_firewall_enable_path(),
            apply_command: default_apply_command(),
            mysqldump_command: default_mysqldump_command(),
            mysql_command: default_mysql_command(),
            reboot_command: default_reboot_command(),
            staging_root: default_staging_root(),
            lock_file: default_lock_file(),
        }
    }
}

// Default values
fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "pbx".to_string())
}

fn default_retention_days() -> u32 {
    30
}

fn default_local_directory() -> PathBuf {
    PathBuf::from("/var/backups/pbx")
}

fn default_sftp_port() -> u16 {
    22
}

fn default_remote_directory() -> String {
    "/backups/pbx".to_string()
}

fn default_mysql_host() -> String {
    "localhost".to_string()
}

fn default_mysql_user() -> String {
    "root".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/pbx-config")
}

fn default_network_file() -> String {
    "network.yml".to_string()
}

fn default_constants_file() -> String {
    "constants.yml".to_string()
}

fn default_main_file() -> String {
    "config.yml".to_string()
}

fn default_encryption_key_path() -> String {
    "credentials.mysql.key".to_string()
}

fn default_firewall_enable_path() -> String {
    "security.firewall.enable".to_string()
}

fn default_apply_command() -> String {
    "pbxcfg".to_string()
}

fn default_mysqldump_command() -> String {
    "mysqldump".to_string()
}

fn default_mysql_command() -> String {
    "mysql".to_string()
}

fn default_reboot_command() -> String {
    "systemctl reboot".to_string()
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("/var/lib/pbx-backup/tmp")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/pbx-backup.lock")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the artifact naming grammar or that
    /// indicate an incomplete installation.
    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() {
            return Err(EngineError::Config("server_name must not be empty".into()));
        }
        if self.server_name.contains(['-', '_']) {
            return Err(EngineError::Config(format!(
                "server_name must not contain '-' or '_': {}",
                self.server_name
            )));
        }
        if self.storage.kind == StorageKind::Remote && self.storage.remote.is_none() {
            return Err(EngineError::Config(
                "storage.kind = \"remote\" requires a [storage.remote] section".into(),
            ));
        }
        Ok(())
    }

    /// Absolute path of the file holding the database encryption key.
    pub fn constants_file_path(&self) -> PathBuf {
        self.platform.config_dir.join(&self.platform.constants_file)
    }

    /// Absolute path of the main platform configuration file.
    pub fn main_file_path(&self) -> PathBuf {
        self.platform.config_dir.join(&self.platform.main_file)
    }
}
