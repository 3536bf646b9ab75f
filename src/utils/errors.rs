//! Custom error types for the backup/restore engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration tree copy failed: {0}")]
    ConfigCopy(String),

    #[error("Database dump failed: {0}")]
    Dump(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact name: {0}")]
    Parse(String),

    #[error("Configuration apply failed: {0}")]
    Apply(String),

    #[error("Database restore failed: {0}")]
    DatabaseRestore(String),

    #[error("Another backup or restore is already running")]
    Busy,

    #[error("Field locator error: {0}")]
    Field(String),

    #[error("Command failed to start: {0}")]
    Command(String),

    /// A step failed after the host was already mutated. The engine performs
    /// no automatic rollback; the operator must inspect the logs and the
    /// last completed state.
    #[error("Manual intervention required (last completed state: {completed}): {source}")]
    ManualIntervention {
        completed: String,
        #[source]
        source: Box<EngineError>,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
