use std::io;
use std::path::{Path, PathBuf};

use jobrig_core::config::ProvisionerConfig;
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::descriptor::{AuthMode, ConnectionDescriptor};
use crate::error::{AdminError, ProvisionError, ProvisionStage, Result};
use crate::retry::TeardownPolicy;
use crate::server::{DatabaseServer, OfflineMode};

/// Lifecycle of an [`EphemeralDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    Created,
    Dropped,
}

/// Result of [`EphemeralDatabase::teardown`]. Teardown never fails the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Dropped { attempts: u32 },
    /// Every attempt failed; the backing file may remain in the scratch dir.
    Abandoned { attempts: u32, error: String },
    AlreadyDropped,
}

/// A uniquely named database that exists for the lifetime of this value.
///
/// Construction creates and configures the database; dropping the value
/// tears it down with retries. Teardown failures are logged, never raised,
/// since the backing file lives in a scratch directory the host reclaims.
pub struct EphemeralDatabase<S: DatabaseServer> {
    server: S,
    name: String,
    backing_file: PathBuf,
    descriptor: ConnectionDescriptor,
    policy: TeardownPolicy,
    state: DatabaseState,
}

impl<S: DatabaseServer> EphemeralDatabase<S> {
    /// Create a database named `{name_prefix}{uuid}` in the scratch dir and
    /// enable snapshot reads on it. Not retried.
    pub fn create(server: S, config: &ProvisionerConfig) -> Result<Self> {
        let name = format!("{}{}", config.name_prefix, Uuid::new_v4().simple());
        let backing_file = config.scratch_dir().join(format!("{name}.db"));
        let descriptor = ConnectionDescriptor {
            server: server.alias().to_string(),
            catalog: name.clone(),
            file: backing_file.clone(),
            auth: AuthMode::Integrated,
        };

        let mut db = Self {
            server,
            name,
            backing_file,
            descriptor,
            policy: TeardownPolicy::from_config(&config.teardown),
            state: DatabaseState::Created,
        };
        if let Err(e) = db.provision() {
            // Already cleaned up (or never created); nothing left for `Drop`.
            db.state = DatabaseState::Dropped;
            return Err(e);
        }
        info!(database = %db.name, file = %db.backing_file.display(), "ephemeral database ready");
        Ok(db)
    }

    fn provision(&self) -> Result<()> {
        let fail = |stage, source| ProvisionError::Provisioning {
            name: self.name.clone(),
            stage,
            source,
        };

        self.server
            .create_database(&self.name, &self.backing_file)
            .map_err(|e| fail(ProvisionStage::CreateDatabase, e))?;

        let configured = self
            .server
            .set_read_committed_snapshot(&self.name)
            .map_err(|e| fail(ProvisionStage::ReadCommittedSnapshot, e))
            .and_then(|()| {
                self.server
                    .allow_snapshot_isolation(&self.name)
                    .map_err(|e| fail(ProvisionStage::SnapshotIsolation, e))
            });
        if configured.is_err() {
            if let Err(e) = self.drop_database(&self.name, true) {
                warn!(database = %self.name, "cleanup after failed provisioning: {e}");
            }
        }
        configured
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    pub fn state(&self) -> DatabaseState {
        self.state
    }

    /// Only meaningful while the database is `Created`.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    /// Replace the retry policy used by [`teardown`](Self::teardown).
    pub fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Open a new connection to the database.
    pub fn connect(&self) -> Result<Connection> {
        if self.state == DatabaseState::Dropped {
            return Err(ProvisionError::Dropped {
                name: self.name.clone(),
            });
        }
        self.descriptor
            .open()
            .map_err(|source| ProvisionError::Connect {
                name: self.name.clone(),
                source,
            })
    }

    /// Run setup statements in order on one connection, without a wrapping
    /// transaction. The first failure stops the script.
    pub fn load_schema<I, T>(&self, statements: I) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let conn = self.connect()?;
        let mut executed = 0;
        for (index, statement) in statements.into_iter().enumerate() {
            conn.execute_batch(statement.as_ref())
                .map_err(|source| ProvisionError::SchemaLoad { index, source })?;
            executed += 1;
        }
        debug!(database = %self.name, statements = executed, "schema loaded");
        Ok(executed)
    }

    /// Take `name` offline, drop it and delete its backing file.
    ///
    /// With `auto_rollback` other connections are ignored: their pending
    /// writes go to the deleted files and are discarded. Without it the call
    /// fails if anyone else holds the database. A
    /// database that is already offline, gone, or missing its file is not
    /// an error, so dropping twice is safe.
    pub fn drop_database(&self, name: &str, auto_rollback: bool) -> Result<()> {
        let teardown = |source| ProvisionError::Teardown {
            name: name.to_string(),
            source,
        };

        let file = self
            .server
            .database_file(name)
            .map_err(teardown)?
            .or_else(|| (name == self.name).then(|| self.backing_file.clone()));

        let mode = if auto_rollback {
            OfflineMode::RollbackImmediate
        } else {
            OfflineMode::NoWait
        };
        tolerate_missing(self.server.set_offline(name, mode)).map_err(teardown)?;
        tolerate_missing(self.server.drop_database(name)).map_err(teardown)?;

        if let Some(file) = file {
            remove_database_files(&file).map_err(|e| teardown(AdminError::Io(e)))?;
        }
        Ok(())
    }

    /// Drop this database with retries. Exhaustion is logged and swallowed.
    pub fn teardown(&mut self) -> TeardownOutcome {
        if self.state == DatabaseState::Dropped {
            return TeardownOutcome::AlreadyDropped;
        }

        let outcome = match self
            .policy
            .run(|_| self.drop_database(&self.name, true))
        {
            Ok(((), attempts)) => {
                info!(database = %self.name, attempts, "ephemeral database dropped");
                TeardownOutcome::Dropped { attempts }
            }
            Err(exhausted) => {
                warn!(
                    database = %self.name,
                    attempts = exhausted.attempts,
                    file = %self.backing_file.display(),
                    "giving up on dropping ephemeral database: {}",
                    exhausted.last_error
                );
                TeardownOutcome::Abandoned {
                    attempts: exhausted.attempts,
                    error: exhausted.last_error.to_string(),
                }
            }
        };
        self.state = DatabaseState::Dropped;
        outcome
    }
}

/// Retries sleep on the current thread. In async tests call
/// [`EphemeralDatabase::teardown`] explicitly (or drop the value inside
/// `spawn_blocking`) rather than letting it drop on a runtime worker.
impl<S: DatabaseServer> Drop for EphemeralDatabase<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn tolerate_missing(
    result: std::result::Result<(), AdminError>,
) -> std::result::Result<(), AdminError> {
    match result {
        Err(AdminError::DatabaseNotFound { name }) => {
            debug!(database = %name, "database already gone");
            Ok(())
        }
        other => other,
    }
}

/// Delete the database file and the SQLite side files next to it.
fn remove_database_files(file: &Path) -> io::Result<()> {
    let mut paths = vec![file.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut side = file.as_os_str().to_owned();
        side.push(suffix);
        paths.push(PathBuf::from(side));
    }
    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
