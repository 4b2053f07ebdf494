use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{info, warn};

use crate::db::{from_db_time, init_db, to_db_time};
use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::types::{JobDetail, JobKey, Schedule, Trigger, TriggerKey, TriggerState};

const TRIGGER_COLUMNS: &str = "trigger_name, trigger_group, job_name, job_group, schedule,
     state, next_fire, prev_fire, fire_count, max_fires";

/// Job store persisting jobs and triggers to SQLite.
///
/// Owns a single connection behind a mutex; the engine and callers share it.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap `conn`, creating the schema if it is missing.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Columns in [`TRIGGER_COLUMNS`] order.
fn trigger_from_row(row: &Row<'_>) -> rusqlite::Result<Trigger> {
    let schedule_json: String = row.get(4)?;
    let state: String = row.get(5)?;
    let schedule: Schedule = serde_json::from_str(&schedule_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let state: TriggerState = state.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Trigger {
        key: TriggerKey::with_group(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        job_key: JobKey::with_group(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        schedule,
        state,
        next_fire: row.get::<_, Option<String>>(6)?.as_deref().and_then(from_db_time),
        prev_fire: row.get::<_, Option<String>>(7)?.as_deref().and_then(from_db_time),
        fire_count: row.get(8)?,
        max_fires: row.get(9)?,
    })
}

impl JobStore for SqliteJobStore {
    fn store_job_and_trigger(&self, job: &JobDetail, trigger: &Trigger) -> Result<()> {
        let schedule_json = serde_json::to_string(&trigger.schedule)?;
        let mut conn = self.conn.lock().expect("job store poisoned");
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM job_details WHERE job_name = ?1 AND job_group = ?2",
                [&job.key.name, &job.key.group],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(SchedulerError::JobAlreadyExists {
                key: job.key.clone(),
            });
        }

        tx.execute(
            "INSERT INTO job_details
             (job_name, job_group, job_type, description, is_durable,
              requests_recovery, is_nonconcurrent, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            rusqlite::params![
                job.key.name,
                job.key.group,
                job.job_type,
                job.description,
                job.durable,
                job.requests_recovery,
                job.disallow_concurrent,
                to_db_time(Utc::now()),
            ],
        )?;
        tx.execute(
            "INSERT INTO triggers
             (trigger_name, trigger_group, job_name, job_group, schedule,
              state, next_fire, prev_fire, fire_count, max_fires)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                trigger.key.name,
                trigger.key.group,
                trigger.job_key.name,
                trigger.job_key.group,
                schedule_json,
                trigger.state.to_string(),
                trigger.next_fire.map(to_db_time),
                trigger.prev_fire.map(to_db_time),
                trigger.fire_count,
                trigger.max_fires,
            ],
        )?;
        tx.commit()?;

        info!(job = %job.key, trigger = %trigger.key, "job stored");
        Ok(())
    }

    fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let job = conn
            .query_row(
                "SELECT job_type, description, is_durable, requests_recovery, is_nonconcurrent
                 FROM job_details WHERE job_name = ?1 AND job_group = ?2",
                [&key.name, &key.group],
                |row| {
                    Ok(JobDetail {
                        key: key.clone(),
                        job_type: row.get(0)?,
                        description: row.get(1)?,
                        durable: row.get(2)?,
                        requests_recovery: row.get(3)?,
                        disallow_concurrent: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(job)
    }

    fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut conn = self.conn.lock().expect("job store poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM triggers WHERE job_name = ?1 AND job_group = ?2",
            [&key.name, &key.group],
        )?;
        let n = tx.execute(
            "DELETE FROM job_details WHERE job_name = ?1 AND job_group = ?2",
            [&key.name, &key.group],
        )?;
        tx.commit()?;
        if n > 0 {
            info!(job = %key, "job removed");
        }
        Ok(n > 0)
    }

    fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<Trigger>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers
             WHERE job_name = ?1 AND job_group = ?2 ORDER BY trigger_group, trigger_name"
        ))?;
        let triggers = stmt
            .query_map([&key.name, &key.group], trigger_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(triggers)
    }

    fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState> {
        let conn = self.conn.lock().expect("job store poisoned");
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM triggers WHERE trigger_name = ?1 AND trigger_group = ?2",
                [&key.name, &key.group],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match state {
            Some(s) => s.parse().unwrap_or_else(|e: String| {
                warn!(trigger = %key, "{e}");
                TriggerState::Error
            }),
            None => TriggerState::None,
        })
    }

    fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers
             WHERE state = 'normal' AND next_fire IS NOT NULL AND next_fire <= ?1
             ORDER BY next_fire"
        ))?;
        // A row that fails to decode must not stall every other trigger.
        let triggers = stmt
            .query_map([to_db_time(now)], trigger_from_row)?
            .filter_map(|r| match r {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("skipping undecodable trigger row: {e}");
                    None
                }
            })
            .collect();
        Ok(triggers)
    }

    fn trigger_fired(
        &self,
        key: &TriggerKey,
        fired_at: DateTime<Utc>,
        next_fire: Option<DateTime<Utc>>,
        state: TriggerState,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("job store poisoned");
        conn.execute(
            "UPDATE triggers SET state = ?1, prev_fire = ?2, next_fire = ?3,
              fire_count = fire_count + 1
             WHERE trigger_name = ?4 AND trigger_group = ?5",
            rusqlite::params![
                state.to_string(),
                to_db_time(fired_at),
                next_fire.map(to_db_time),
                key.name,
                key.group,
            ],
        )?;
        Ok(())
    }

    fn transition_job_triggers(
        &self,
        job: &JobKey,
        from: TriggerState,
        to: TriggerState,
    ) -> Result<usize> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n = conn.execute(
            "UPDATE triggers SET state = ?1
             WHERE job_name = ?2 AND job_group = ?3 AND state = ?4",
            rusqlite::params![to.to_string(), job.name, job.group, from.to_string()],
        )?;
        Ok(n)
    }

    fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n = conn.execute(
            "DELETE FROM triggers WHERE trigger_name = ?1 AND trigger_group = ?2",
            [&key.name, &key.group],
        )?;
        Ok(n > 0)
    }

    fn recover_blocked(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n = conn.execute(
            "UPDATE triggers SET state = 'normal' WHERE state = 'blocked'",
            [],
        )?;
        if n > 0 {
            warn!(count = n, "blocked triggers recovered on startup");
        }
        Ok(n)
    }
}
