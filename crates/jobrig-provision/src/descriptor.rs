use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

/// How clients authenticate against the database server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// The current OS user; no credentials travel with the descriptor.
    Integrated,
}

/// Immutable connection parameters of a provisioned database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Alias of the server hosting the database.
    pub server: String,
    /// Database (catalog) name.
    pub catalog: String,
    /// Backing file the catalog lives in.
    pub file: PathBuf,
    pub auth: AuthMode,
}

impl ConnectionDescriptor {
    /// Connection string in the `key=value;` form test logs expect.
    pub fn connection_string(&self) -> String {
        let auth = match self.auth {
            AuthMode::Integrated => "Integrated Security=True",
        };
        format!(
            "Data Source={};Initial Catalog={};File={};{auth}",
            self.server,
            self.catalog,
            self.file.display()
        )
    }

    /// Open a connection to the existing database. Never creates the file.
    pub fn open(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.file,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.connection_string())
    }
}
