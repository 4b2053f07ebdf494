use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use jobrig_core::config::SchedulerConfig;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    job::{Job, JobExecutionContext, JobRegistry},
    schedule::validate,
    store::JobStore,
    types::{JobDetail, JobKey, Trigger, TriggerKey, TriggerState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Standby,
    Started,
    ShutDown,
}

struct Inner {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    registry: JobRegistry,
    lifecycle: Mutex<Lifecycle>,
    /// Keys of running jobs that disallow concurrent execution.
    executing: Mutex<HashSet<JobKey>>,
    workers: Arc<Semaphore>,
    runs: Mutex<JoinSet<()>>,
    /// Wakes the loop early (new schedule, finished run).
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Tokio scheduler: fires due triggers from a [`JobStore`] onto a bounded
/// pool of worker tasks.
///
/// Call [`Scheduler::shutdown`] to stop it; dropping the scheduler without
/// shutting down signals the loop and aborts in-flight runs.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let workers = Arc::new(Semaphore::new(config.thread_count.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                registry: JobRegistry::new(),
                lifecycle: Mutex::new(Lifecycle::Standby),
                executing: Mutex::new(HashSet::new()),
                workers,
                runs: Mutex::new(JoinSet::new()),
                wake: Notify::new(),
                shutdown_tx,
                loop_handle: Mutex::new(None),
            }),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.inner.config.instance_name
    }

    /// Make `job` available to job details whose `job_type` is `job_type`.
    pub fn register_job_type(&self, job_type: impl Into<String>, job: Arc<dyn Job>) {
        self.inner.registry.register(job_type, job);
    }

    /// Start the polling loop. Must be called within a Tokio runtime.
    ///
    /// Triggers left `Blocked` by a previous process are unblocked first.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().expect("lifecycle poisoned");
        match *lifecycle {
            Lifecycle::Started => return Ok(()),
            Lifecycle::ShutDown => return Err(SchedulerError::ShutDown),
            Lifecycle::Standby => {}
        }

        self.inner.store.recover_blocked()?;
        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_loop(inner, shutdown));
        *self.inner.loop_handle.lock().expect("loop handle poisoned") = Some(handle);
        *lifecycle = Lifecycle::Started;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        *self.inner.lifecycle.lock().expect("lifecycle poisoned") == Lifecycle::Started
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.lifecycle.lock().expect("lifecycle poisoned") == Lifecycle::ShutDown
    }

    /// Store `job` with its first `trigger`. Returns the first fire time.
    pub fn schedule_job(&self, job: &JobDetail, trigger: &Trigger) -> Result<DateTime<Utc>> {
        if self.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }
        validate(&trigger.schedule)?;
        if trigger.job_key != job.key {
            return Err(SchedulerError::InvalidSchedule(format!(
                "trigger {} references job {}, not {}",
                trigger.key, trigger.job_key, job.key
            )));
        }
        if !self.inner.registry.contains(&job.job_type) {
            return Err(SchedulerError::UnknownJobType {
                job_type: job.job_type.clone(),
            });
        }
        let first_fire = trigger.next_fire.ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("trigger {} will never fire", trigger.key))
        })?;

        self.inner.store.store_job_and_trigger(job, trigger)?;
        info!(job = %job.key, trigger = %trigger.key, %first_fire, "job scheduled");
        self.inner.wake.notify_one();
        Ok(first_fire)
    }

    pub fn get_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        self.inner.store.retrieve_job(key)
    }

    pub fn get_triggers_of_job(&self, key: &JobKey) -> Result<Vec<Trigger>> {
        self.inner.store.triggers_of_job(key)
    }

    pub fn get_trigger_state(&self, key: &TriggerKey) -> Result<TriggerState> {
        self.inner.store.trigger_state(key)
    }

    /// Remove a job and its triggers. Running executions are not interrupted.
    pub fn delete_job(&self, key: &JobKey) -> Result<bool> {
        self.inner.store.remove_job(key)
    }

    /// Stop `key`'s waiting triggers from firing. Returns how many were paused.
    pub fn pause_job(&self, key: &JobKey) -> Result<usize> {
        self.inner
            .store
            .transition_job_triggers(key, TriggerState::Normal, TriggerState::Paused)
    }

    pub fn resume_job(&self, key: &JobKey) -> Result<usize> {
        let n = self
            .inner
            .store
            .transition_job_triggers(key, TriggerState::Paused, TriggerState::Normal)?;
        self.inner.wake.notify_one();
        Ok(n)
    }

    /// Keys of non-concurrent jobs that are executing right now.
    pub fn currently_executing(&self) -> Vec<JobKey> {
        self.inner
            .executing
            .lock()
            .expect("executing set poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Stop the loop. With `wait_for_jobs` in-flight executions run to
    /// completion, otherwise they are aborted at their next await point.
    pub async fn shutdown(&self, wait_for_jobs: bool) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock().expect("lifecycle poisoned");
            if *lifecycle == Lifecycle::ShutDown {
                return Ok(());
            }
            *lifecycle = Lifecycle::ShutDown;
        }
        info!(instance = %self.inner.config.instance_name, wait_for_jobs, "scheduler shutting down");

        let _ = self.inner.shutdown_tx.send(true);
        let handle = self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("scheduler loop ended abnormally: {e}");
            }
        }

        let mut runs = std::mem::take(&mut *self.inner.runs.lock().expect("run set poisoned"));
        if !wait_for_jobs {
            runs.abort_all();
        }
        while let Some(res) = runs.join_next().await {
            if let Err(e) = res {
                if !e.is_cancelled() {
                    error!("job execution panicked: {e}");
                }
            }
        }
        info!(instance = %self.inner.config.instance_name, "scheduler shut down");
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.inner.shutdown_tx.send(true);
        if let Ok(mut runs) = self.inner.runs.lock() {
            runs.abort_all();
        }
    }
}

/// Main event loop. Ticks every poll interval or when woken, until
/// `shutdown` broadcasts `true`.
async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    info!(instance = %inner.config.instance_name, "scheduler engine started");

    let mut interval = tokio::time::interval(inner.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = inner.wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        if let Err(e) = inner.tick() {
            error!("scheduler tick error: {e}");
        }
    }
    debug!(instance = %inner.config.instance_name, "scheduler engine loop exited");
}

impl Inner {
    /// Fire every due trigger the worker pool has room for.
    fn tick(self: &Arc<Self>) -> Result<()> {
        self.reap_finished();
        let now = Utc::now();

        for trigger in self.store.due_triggers(now)? {
            let Some(job) = self.store.retrieve_job(&trigger.job_key)? else {
                warn!(trigger = %trigger.key, job = %trigger.job_key, "orphaned trigger removed");
                self.store.remove_trigger(&trigger.key)?;
                continue;
            };
            if job.disallow_concurrent && self.is_executing(&job.key) {
                continue;
            }
            let Some(implementation) = self.registry.get(&job.job_type) else {
                error!(job = %job.key, job_type = %job.job_type, "no job registered for type");
                self.store
                    .transition_job_triggers(&job.key, TriggerState::Normal, TriggerState::Error)?;
                continue;
            };
            let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() else {
                debug!("worker pool saturated; remaining triggers wait for the next tick");
                break;
            };
            self.fire(trigger, job, implementation, permit, now)?;
        }
        Ok(())
    }

    fn fire(
        self: &Arc<Self>,
        trigger: Trigger,
        job: JobDetail,
        implementation: Arc<dyn Job>,
        permit: OwnedSemaphorePermit,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let next = trigger.next_after_fire(now);
        // Non-concurrent jobs block all their triggers until the run ends.
        let state = if job.disallow_concurrent {
            TriggerState::Blocked
        } else if next.is_some() {
            TriggerState::Normal
        } else {
            TriggerState::Complete
        };
        self.store.trigger_fired(&trigger.key, now, next, state)?;
        if job.disallow_concurrent {
            self.store
                .transition_job_triggers(&job.key, TriggerState::Normal, TriggerState::Blocked)?;
            self.executing
                .lock()
                .expect("executing set poisoned")
                .insert(job.key.clone());
        }

        let ctx = JobExecutionContext {
            job_key: job.key.clone(),
            trigger_key: trigger.key.clone(),
            fire_instance_id: Uuid::new_v4().to_string(),
            fire_time: now,
            fire_count: trigger.fire_count + 1,
        };
        info!(
            job = %job.key,
            trigger = %trigger.key,
            fire = ctx.fire_count,
            next_state = %state,
            "firing trigger"
        );

        let completion = Completion {
            inner: Arc::clone(self),
            job,
            trigger_key: trigger.key,
            exhausted: next.is_none(),
        };
        self.runs.lock().expect("run set poisoned").spawn(async move {
            let _permit = permit;
            let _completion = completion;
            match implementation.execute(&ctx).await {
                Ok(()) => debug!(job = %ctx.job_key, id = %ctx.fire_instance_id, "job finished"),
                Err(e) => warn!(job = %ctx.job_key, id = %ctx.fire_instance_id, "{e}"),
            }
        });
        Ok(())
    }

    fn is_executing(&self, key: &JobKey) -> bool {
        self.executing
            .lock()
            .expect("executing set poisoned")
            .contains(key)
    }

    fn reap_finished(&self) {
        let mut runs = self.runs.lock().expect("run set poisoned");
        while let Some(res) = runs.try_join_next() {
            if let Err(e) = res {
                if !e.is_cancelled() {
                    error!("job execution panicked: {e}");
                }
            }
        }
    }

    /// Bookkeeping after a run ends, however it ends.
    fn complete(&self, job: &JobDetail, trigger_key: &TriggerKey, exhausted: bool) -> Result<()> {
        if exhausted {
            self.store.remove_trigger(trigger_key)?;
        }
        if job.disallow_concurrent {
            self.executing
                .lock()
                .expect("executing set poisoned")
                .remove(&job.key);
            self.store
                .transition_job_triggers(&job.key, TriggerState::Blocked, TriggerState::Normal)?;
        }
        if !job.durable && self.store.triggers_of_job(&job.key)?.is_empty() {
            self.store.remove_job(&job.key)?;
            debug!(job = %job.key, "non-durable job removed after its last trigger");
        }
        self.wake.notify_one();
        Ok(())
    }
}

/// Runs [`Inner::complete`] when the execution task finishes or is aborted.
struct Completion {
    inner: Arc<Inner>,
    job: JobDetail,
    trigger_key: TriggerKey,
    exhausted: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Err(e) = self
            .inner
            .complete(&self.job, &self.trigger_key, self.exhausted)
        {
            error!(job = %self.job.key, "post-execution bookkeeping failed: {e}");
        }
    }
}
