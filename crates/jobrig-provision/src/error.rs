use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by an administrative database server.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid database name: {name:?}")]
    InvalidName { name: String },

    #[error("database already exists: {name}")]
    DatabaseExists { name: String },

    #[error("backing file already exists: {}", path.display())]
    FileExists { path: PathBuf },

    #[error("database not found: {name}")]
    DatabaseNotFound { name: String },

    #[error("database is offline: {name}")]
    DatabaseOffline { name: String },

    /// Exclusive access was requested without waiting and others hold locks.
    #[error("database is in use: {name}")]
    Busy { name: String },
}

/// Step of database provisioning that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    CreateDatabase,
    ReadCommittedSnapshot,
    SnapshotIsolation,
}

impl std::fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisionStage::CreateDatabase => "create database",
            ProvisionStage::ReadCommittedSnapshot => "enable read committed snapshot",
            ProvisionStage::SnapshotIsolation => "allow snapshot isolation",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Creating or configuring the database failed. Fatal to the test.
    #[error("provisioning {name} failed ({stage}): {source}")]
    Provisioning {
        name: String,
        stage: ProvisionStage,
        source: AdminError,
    },

    /// A setup statement failed; later statements were not run.
    #[error("schema statement #{index} failed: {source}")]
    SchemaLoad {
        index: usize,
        source: rusqlite::Error,
    },

    /// Dropping a database failed.
    #[error("dropping {name} failed: {source}")]
    Teardown { name: String, source: AdminError },

    #[error("cannot connect to {name}: {source}")]
    Connect {
        name: String,
        source: rusqlite::Error,
    },

    #[error("database {name} has already been dropped")]
    Dropped { name: String },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
