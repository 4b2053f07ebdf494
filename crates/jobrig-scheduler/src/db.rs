use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Scheduler schema as an ordered list of statements.
///
/// Every statement is idempotent, so the list can be fed to an external
/// provisioning step and still be re-applied by [`init_db`].
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS job_details (
        job_name            TEXT    NOT NULL,
        job_group           TEXT    NOT NULL,
        job_type            TEXT    NOT NULL,
        description         TEXT,
        is_durable          INTEGER NOT NULL,
        requests_recovery   INTEGER NOT NULL,
        is_nonconcurrent    INTEGER NOT NULL,
        created_at          TEXT    NOT NULL,
        PRIMARY KEY (job_name, job_group)
    ) STRICT",
    "CREATE TABLE IF NOT EXISTS triggers (
        trigger_name    TEXT    NOT NULL,
        trigger_group   TEXT    NOT NULL,
        job_name        TEXT    NOT NULL,
        job_group       TEXT    NOT NULL,
        schedule        TEXT    NOT NULL,   -- JSON-encoded Schedule enum
        state           TEXT    NOT NULL,
        next_fire       TEXT,               -- RFC 3339 (nanos, Z) or NULL
        prev_fire       TEXT,
        fire_count      INTEGER NOT NULL DEFAULT 0,
        max_fires       INTEGER,            -- NULL means unlimited
        PRIMARY KEY (trigger_name, trigger_group)
    ) STRICT",
    // Polling: SELECT … WHERE state = 'normal' AND next_fire <= ?
    "CREATE INDEX IF NOT EXISTS idx_triggers_next_fire ON triggers (state, next_fire)",
    "CREATE INDEX IF NOT EXISTS idx_triggers_job ON triggers (job_name, job_group)",
];

/// Initialise the scheduler schema in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    for statement in SCHEMA {
        conn.execute_batch(statement)?;
    }
    Ok(())
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn from_db_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('job_details', 'triggers')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn db_time_preserves_instant_and_order() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1);
        assert_eq!(from_db_time(&to_db_time(a)), Some(a));
        assert!(to_db_time(a) < to_db_time(b));
    }
}
