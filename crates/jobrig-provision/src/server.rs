use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AdminError;

/// How to take a database offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineMode {
    /// Do not wait for other connections. Their open transactions are not
    /// rolled back by the server; once the files are deleted those writes
    /// land in unlinked files and are lost with them.
    RollbackImmediate,
    /// Fail with [`AdminError::Busy`] instead of waiting for exclusive access.
    NoWait,
}

/// Administrative endpoint that creates and drops databases.
///
/// Only the provisioner talks to it; scheduler connections go straight to
/// the created database.
pub trait DatabaseServer: Send + Sync {
    /// Well-known name of this server.
    fn alias(&self) -> &str;

    /// Create `name` backed by `file`. Fails if either already exists.
    fn create_database(&self, name: &str, file: &Path) -> Result<(), AdminError>;

    /// Make readers see the last committed row versions instead of blocking
    /// on writers.
    fn set_read_committed_snapshot(&self, name: &str) -> Result<(), AdminError>;

    /// Permit snapshot transactions on `name`.
    fn allow_snapshot_isolation(&self, name: &str) -> Result<(), AdminError>;

    /// Take `name` offline. Already offline is not an error.
    fn set_offline(&self, name: &str, mode: OfflineMode) -> Result<(), AdminError>;

    /// Remove `name` from the server. The backing file is left on disk.
    fn drop_database(&self, name: &str) -> Result<(), AdminError>;

    /// Backing file registered for `name`, if the server knows it.
    fn database_file(&self, name: &str) -> Result<Option<PathBuf>, AdminError>;
}

impl<S: DatabaseServer + ?Sized> DatabaseServer for Arc<S> {
    fn alias(&self) -> &str {
        (**self).alias()
    }

    fn create_database(&self, name: &str, file: &Path) -> Result<(), AdminError> {
        (**self).create_database(name, file)
    }

    fn set_read_committed_snapshot(&self, name: &str) -> Result<(), AdminError> {
        (**self).set_read_committed_snapshot(name)
    }

    fn allow_snapshot_isolation(&self, name: &str) -> Result<(), AdminError> {
        (**self).allow_snapshot_isolation(name)
    }

    fn set_offline(&self, name: &str, mode: OfflineMode) -> Result<(), AdminError> {
        (**self).set_offline(name, mode)
    }

    fn drop_database(&self, name: &str) -> Result<(), AdminError> {
        (**self).drop_database(name)
    }

    fn database_file(&self, name: &str) -> Result<Option<PathBuf>, AdminError> {
        (**self).database_file(name)
    }
}
