//! A rendezvous job driven by a real scheduler, with job state stored in a
//! freshly provisioned database.

use std::sync::Arc;
use std::time::Duration;

use jobrig_core::config::{ProvisionerConfig, SchedulerConfig};
use jobrig_provision::{EphemeralDatabase, SqliteServer, TeardownOutcome};
use jobrig_rendezvous::{Rendezvous, RendezvousError, RendezvousJob};
use jobrig_scheduler::{
    db, JobKey, JobStore, RamJobStore, Scheduler, SqliteJobStore, Trigger, TriggerState,
};

const BOUND: Duration = Duration::from_secs(10);

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        instance_name: "rendezvous-test".to_string(),
        poll_interval_ms: 20,
        ..SchedulerConfig::default()
    }
}

fn scheduler_with(store: Arc<dyn JobStore>, rendezvous: &Rendezvous) -> Scheduler {
    let scheduler = Scheduler::new(scheduler_config(), store);
    RendezvousJob::new(rendezvous.clone()).register(&scheduler);
    scheduler
}

/// Schedule the job, wait for it to run and check what the scheduler
/// reports while it is provably executing.
async fn run_once(scheduler: &Scheduler, rendezvous: &Rendezvous) -> anyhow::Result<()> {
    let key = JobKey::new("test");
    assert_eq!(rendezvous.running_count(), 0);

    scheduler.schedule_job(
        &RendezvousJob::job_detail(key.clone()),
        &Trigger::start_now(key.clone()),
    )?;

    rendezvous.wait_till_running().await?;
    assert_eq!(rendezvous.running_count(), 1);

    let triggers = scheduler.get_triggers_of_job(&key)?;
    assert_eq!(triggers.len(), 1);
    let state = scheduler.get_trigger_state(&triggers[0].key)?;
    assert_ne!(state, TriggerState::Complete);
    assert_eq!(state, TriggerState::Blocked);
    assert_eq!(scheduler.currently_executing(), vec![key.clone()]);

    rendezvous.continue_running();
    rendezvous.wait_till_idle(BOUND).await?;
    assert_eq!(rendezvous.running_count(), 0);

    scheduler.shutdown(true).await?;
    // One-shot, non-durable: gone once the run is booked.
    assert!(scheduler.get_job(&key)?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rendezvous_job_on_a_provisioned_database() -> anyhow::Result<()> {
    jobrig_core::logging::init_test_logging();
    let scratch = tempfile::tempdir()?;
    let config = ProvisionerConfig {
        scratch_dir: Some(scratch.path().to_string_lossy().into_owned()),
        ..ProvisionerConfig::default()
    };

    let mut database = EphemeralDatabase::create(SqliteServer::from_config(&config)?, &config)?;
    database.load_schema(db::SCHEMA)?;

    let rendezvous = Rendezvous::new().with_wait_timeout(BOUND);
    let store = Arc::new(SqliteJobStore::new(database.connect()?)?);
    let scheduler = scheduler_with(store, &rendezvous);
    scheduler.start()?;

    run_once(&scheduler, &rendezvous).await?;

    drop(scheduler);
    assert_eq!(database.teardown(), TeardownOutcome::Dropped { attempts: 1 });
    assert!(!database.backing_file().exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rendezvous_job_on_the_in_memory_store() -> anyhow::Result<()> {
    let rendezvous = Rendezvous::new().with_wait_timeout(BOUND);
    let scheduler = scheduler_with(Arc::new(RamJobStore::new()), &rendezvous);
    scheduler.start()?;

    run_once(&scheduler, &rendezvous).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aborted_executions_are_not_counted() -> anyhow::Result<()> {
    let rendezvous = Rendezvous::new().with_wait_timeout(BOUND);
    let scheduler = scheduler_with(Arc::new(RamJobStore::new()), &rendezvous);
    scheduler.start()?;

    let key = JobKey::new("abandoned");
    scheduler.schedule_job(
        &RendezvousJob::job_detail(key.clone()),
        &Trigger::start_now(key),
    )?;
    rendezvous.wait_till_running().await?;
    assert_eq!(rendezvous.running_count(), 1);

    // Never continued: shutting down without waiting aborts the run.
    scheduler.shutdown(false).await?;
    assert_eq!(rendezvous.running_count(), 0);
    Ok(())
}

#[tokio::test]
async fn waiting_on_a_stopped_scheduler_fails_with_a_clear_error() -> anyhow::Result<()> {
    let rendezvous = Rendezvous::new().with_wait_timeout(Duration::from_millis(100));
    let scheduler = scheduler_with(Arc::new(RamJobStore::new()), &rendezvous);

    let key = JobKey::new("never");
    scheduler.schedule_job(
        &RendezvousJob::job_detail(key.clone()),
        &Trigger::start_now(key),
    )?;

    let err = rendezvous.wait_till_running().await.unwrap_err();
    assert_eq!(err, RendezvousError::NeverStarted { waited_ms: 100 });
    assert!(err.to_string().contains("never occurred"));
    assert_eq!(rendezvous.running_count(), 0);
    Ok(())
}
