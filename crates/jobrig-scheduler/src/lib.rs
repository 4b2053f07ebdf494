//! `jobrig-scheduler` — Tokio-based job scheduler with pluggable persistence.
//!
//! # Overview
//!
//! Jobs and their triggers live in a [`store::JobStore`]: either the
//! in-memory [`ram::RamJobStore`] or the SQLite-backed
//! [`sqlite::SqliteJobStore`]. The [`engine::Scheduler`] polls the store,
//! fires due triggers onto a bounded pool of Tokio tasks and keeps trigger
//! state current while jobs run.
//!
//! # Trigger states
//!
//! | State      | Meaning                                               |
//! |------------|-------------------------------------------------------|
//! | `Normal`   | Waiting for its next fire time                        |
//! | `Blocked`  | Its job disallows concurrency and is executing        |
//! | `Complete` | Exhausted; removed once the last execution finishes   |
//! | `Error`    | The job type was not registered when it fired         |
//! | `None`     | Not stored                                            |

pub mod db;
pub mod engine;
pub mod error;
pub mod job;
pub mod ram;
pub mod schedule;
pub mod sqlite;
pub mod store;
pub mod types;

pub use engine::Scheduler;
pub use error::{JobError, Result, SchedulerError};
pub use job::{Job, JobExecutionContext, JobRegistry};
pub use ram::RamJobStore;
pub use sqlite::SqliteJobStore;
pub use store::JobStore;
pub use types::{JobDetail, JobKey, Schedule, Trigger, TriggerKey, TriggerState};
