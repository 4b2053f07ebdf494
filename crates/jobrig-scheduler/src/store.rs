use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{JobDetail, JobKey, Trigger, TriggerKey, TriggerState};

/// Persistence seam of the scheduler.
///
/// Implementations are synchronous; every call is short and the engine
/// invokes them from its tick loop and from finished executions.
pub trait JobStore: Send + Sync {
    /// Store a new job together with its first trigger.
    ///
    /// Fails with `JobAlreadyExists` if the job key is taken.
    fn store_job_and_trigger(&self, job: &JobDetail, trigger: &Trigger) -> Result<()>;

    fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>>;

    /// Remove a job and all of its triggers. Returns whether the job existed.
    fn remove_job(&self, key: &JobKey) -> Result<bool>;

    fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<Trigger>>;

    /// State of a trigger; `TriggerState::None` when it is not stored.
    fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState>;

    /// `Normal` triggers whose next fire time is at or before `now`,
    /// earliest first.
    fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>>;

    /// Record a fire: bump the fire count and move the trigger to `state`.
    fn trigger_fired(
        &self,
        key: &TriggerKey,
        fired_at: DateTime<Utc>,
        next_fire: Option<DateTime<Utc>>,
        state: TriggerState,
    ) -> Result<()>;

    /// Move every trigger of `job` currently in `from` to `to`.
    fn transition_job_triggers(
        &self,
        job: &JobKey,
        from: TriggerState,
        to: TriggerState,
    ) -> Result<usize>;

    fn remove_trigger(&self, key: &TriggerKey) -> Result<bool>;

    /// Unblock triggers left `Blocked` by a process that died mid-execution.
    fn recover_blocked(&self) -> Result<usize>;
}
