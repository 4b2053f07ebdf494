use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use jobrig_core::config::ProvisionerConfig;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::AdminError;
use crate::server::{DatabaseServer, OfflineMode};

/// Marks files created by this server ("jobr").
const APPLICATION_ID: i64 = 0x6a6f_6272;
const MASTER_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Local SQLite "server": a master catalog file listing databases, each
/// backed by its own SQLite file.
///
/// Every administrative call opens a fresh master connection, so several
/// provisioners (and processes) can share one server concurrently.
#[derive(Debug, Clone)]
pub struct SqliteServer {
    alias: String,
    master_path: PathBuf,
}

impl SqliteServer {
    /// Open (or create) the server `alias` with its catalog in `dir`.
    pub fn open(alias: impl Into<String>, dir: impl AsRef<Path>) -> Result<Self, AdminError> {
        let alias = alias.into();
        validate_name(&alias)?;
        std::fs::create_dir_all(dir.as_ref())?;
        let server = Self {
            master_path: dir.as_ref().join(format!("{alias}.master.db")),
            alias,
        };
        init_master(&server.master()?)?;
        Ok(server)
    }

    pub fn from_config(config: &ProvisionerConfig) -> Result<Self, AdminError> {
        Self::open(config.server_alias.clone(), config.scratch_dir())
    }

    pub fn master_path(&self) -> &Path {
        &self.master_path
    }

    /// Names of all databases currently registered.
    pub fn list_databases(&self) -> Result<Vec<String>, AdminError> {
        let conn = self.master()?;
        let mut stmt = conn.prepare("SELECT name FROM databases ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Whether `name` is registered and online.
    pub fn is_online(&self, name: &str) -> Result<bool, AdminError> {
        Ok(self
            .lookup(&self.master()?, name)?
            .is_some_and(|entry| entry.online))
    }

    fn master(&self) -> Result<Connection, AdminError> {
        let conn = Connection::open(&self.master_path)?;
        conn.busy_timeout(MASTER_BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn lookup(&self, master: &Connection, name: &str) -> Result<Option<CatalogEntry>, AdminError> {
        let entry = master
            .query_row(
                "SELECT file, state FROM databases WHERE name = ?1",
                [name],
                |row| {
                    Ok(CatalogEntry {
                        file: PathBuf::from(row.get::<_, String>(0)?),
                        online: row.get::<_, String>(1)? == "online",
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn require(&self, master: &Connection, name: &str) -> Result<CatalogEntry, AdminError> {
        self.lookup(master, name)?
            .ok_or_else(|| AdminError::DatabaseNotFound {
                name: name.to_string(),
            })
    }
}

struct CatalogEntry {
    file: PathBuf,
    online: bool,
}

fn init_master(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS databases (
            name                        TEXT    NOT NULL PRIMARY KEY,
            file                        TEXT    NOT NULL,
            state                       TEXT    NOT NULL,   -- 'online' | 'offline'
            read_committed_snapshot     INTEGER NOT NULL DEFAULT 0,
            allow_snapshot_isolation    INTEGER NOT NULL DEFAULT 0,
            created_at                  TEXT    NOT NULL
        ) STRICT;",
    )
}

/// Names end up in file names; keep them to a portable character set.
fn validate_name(name: &str) -> Result<(), AdminError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AdminError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

impl DatabaseServer for SqliteServer {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn create_database(&self, name: &str, file: &Path) -> Result<(), AdminError> {
        validate_name(name)?;
        let master = self.master()?;
        if self.lookup(&master, name)?.is_some() {
            return Err(AdminError::DatabaseExists {
                name: name.to_string(),
            });
        }
        if file.exists() {
            return Err(AdminError::FileExists {
                path: file.to_path_buf(),
            });
        }

        // SQLite creates files lazily; writing the header makes it real.
        let db = Connection::open(file)?;
        db.pragma_update(None, "application_id", APPLICATION_ID)?;
        drop(db);

        let registered = master.execute(
            "INSERT INTO databases (name, file, state, created_at)
             VALUES (?1, ?2, 'online', ?3)",
            rusqlite::params![name, file.to_string_lossy().into_owned(), Utc::now().to_rfc3339()],
        );
        if let Err(e) = registered {
            // Unregistered files would never be dropped.
            if let Err(io) = std::fs::remove_file(file) {
                warn!(file = %file.display(), "removing unregistered database file: {io}");
            }
            return Err(e.into());
        }
        info!(server = %self.alias, database = name, file = %file.display(), "database created");
        Ok(())
    }

    fn set_read_committed_snapshot(&self, name: &str) -> Result<(), AdminError> {
        let master = self.master()?;
        let entry = self.require(&master, name)?;
        if !entry.online {
            return Err(AdminError::DatabaseOffline {
                name: name.to_string(),
            });
        }

        // WAL readers work on the last committed snapshot and never block writers.
        let db = Connection::open(&entry.file)?;
        let mode: String = db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(database = name, %mode, "journal mode set");

        master.execute(
            "UPDATE databases SET read_committed_snapshot = 1 WHERE name = ?1",
            [name],
        )?;
        Ok(())
    }

    fn allow_snapshot_isolation(&self, name: &str) -> Result<(), AdminError> {
        let n = self.master()?.execute(
            "UPDATE databases SET allow_snapshot_isolation = 1 WHERE name = ?1",
            [name],
        )?;
        if n == 0 {
            return Err(AdminError::DatabaseNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn set_offline(&self, name: &str, mode: OfflineMode) -> Result<(), AdminError> {
        let master = self.master()?;
        let entry = self.require(&master, name)?;
        if !entry.online {
            debug!(database = name, "already offline");
            return Ok(());
        }

        if mode == OfflineMode::NoWait && entry.file.exists() {
            let db = Connection::open(&entry.file)?;
            db.busy_timeout(Duration::ZERO)?;
            match db.execute_batch("BEGIN EXCLUSIVE; COMMIT;") {
                Ok(()) => {}
                Err(e) if is_busy(&e) => {
                    return Err(AdminError::Busy {
                        name: name.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        master.execute(
            "UPDATE databases SET state = 'offline' WHERE name = ?1",
            [name],
        )?;
        info!(database = name, ?mode, "database offline");
        Ok(())
    }

    fn drop_database(&self, name: &str) -> Result<(), AdminError> {
        let n = self
            .master()?
            .execute("DELETE FROM databases WHERE name = ?1", [name])?;
        if n == 0 {
            return Err(AdminError::DatabaseNotFound {
                name: name.to_string(),
            });
        }
        info!(server = %self.alias, database = name, "database dropped");
        Ok(())
    }

    fn database_file(&self, name: &str) -> Result<Option<PathBuf>, AdminError> {
        Ok(self.lookup(&self.master()?, name)?.map(|entry| entry.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(dir: &Path) -> SqliteServer {
        SqliteServer::open("local", dir).unwrap()
    }

    #[test]
    fn create_registers_an_online_database() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let file = dir.path().join("one.db");

        server.create_database("one", &file).unwrap();
        assert!(file.exists());
        assert!(server.is_online("one").unwrap());
        assert_eq!(server.database_file("one").unwrap(), Some(file));
        assert_eq!(server.list_databases().unwrap(), vec!["one".to_string()]);
    }

    #[test]
    fn duplicate_names_and_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let file = dir.path().join("one.db");
        server.create_database("one", &file).unwrap();

        assert!(matches!(
            server.create_database("one", &dir.path().join("other.db")),
            Err(AdminError::DatabaseExists { .. })
        ));
        assert!(matches!(
            server.create_database("two", &file),
            Err(AdminError::FileExists { .. })
        ));
    }

    #[test]
    fn failed_registration_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        Connection::open(server.master_path())
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER catalog_full BEFORE INSERT ON databases
                 BEGIN SELECT RAISE(ABORT, 'catalog full'); END;",
            )
            .unwrap();

        let file = dir.path().join("orphan.db");
        assert!(matches!(
            server.create_database("orphan", &file),
            Err(AdminError::Database(_))
        ));
        assert!(!file.exists());
        assert!(server.list_databases().unwrap().is_empty());
    }

    #[test]
    fn names_must_be_file_safe() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        assert!(matches!(
            server.create_database("../escape", &dir.path().join("x.db")),
            Err(AdminError::InvalidName { .. })
        ));
        assert!(SqliteServer::open("", dir.path()).is_err());
    }

    #[test]
    fn read_committed_snapshot_switches_to_wal() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let file = dir.path().join("snap.db");
        server.create_database("snap", &file).unwrap();
        server.set_read_committed_snapshot("snap").unwrap();
        server.allow_snapshot_isolation("snap").unwrap();

        let db = Connection::open(&file).unwrap();
        let mode: String = db
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn offline_is_idempotent_and_drop_requires_existence() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        server
            .create_database("gone", &dir.path().join("gone.db"))
            .unwrap();

        server.set_offline("gone", OfflineMode::RollbackImmediate).unwrap();
        server.set_offline("gone", OfflineMode::NoWait).unwrap();
        assert!(!server.is_online("gone").unwrap());
        assert!(matches!(
            server.set_read_committed_snapshot("gone"),
            Err(AdminError::DatabaseOffline { .. })
        ));

        server.drop_database("gone").unwrap();
        assert!(matches!(
            server.drop_database("gone"),
            Err(AdminError::DatabaseNotFound { .. })
        ));
        assert!(matches!(
            server.set_offline("gone", OfflineMode::NoWait),
            Err(AdminError::DatabaseNotFound { .. })
        ));
    }

    #[test]
    fn no_wait_fails_while_a_writer_holds_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let file = dir.path().join("busy.db");
        server.create_database("busy", &file).unwrap();
        server.set_read_committed_snapshot("busy").unwrap();

        let writer = Connection::open(&file).unwrap();
        writer.execute_batch("BEGIN IMMEDIATE;").unwrap();

        assert!(matches!(
            server.set_offline("busy", OfflineMode::NoWait),
            Err(AdminError::Busy { .. })
        ));
        assert!(server.is_online("busy").unwrap());

        // Rollback-immediate does not wait for the writer.
        server.set_offline("busy", OfflineMode::RollbackImmediate).unwrap();
        assert!(!server.is_online("busy").unwrap());
        writer.execute_batch("ROLLBACK;").unwrap();
    }

    #[test]
    fn catalog_is_shared_between_server_handles() {
        let dir = tempfile::tempdir().unwrap();
        let a = server(dir.path());
        let b = server(dir.path());
        a.create_database("shared", &dir.path().join("shared.db"))
            .unwrap();
        assert!(b.is_online("shared").unwrap());
    }
}
