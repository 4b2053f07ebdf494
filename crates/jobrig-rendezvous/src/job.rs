use std::sync::Arc;

use async_trait::async_trait;
use jobrig_scheduler::{Job, JobDetail, JobError, JobExecutionContext, JobKey, Scheduler};
use tracing::debug;

use crate::rendezvous::Rendezvous;

/// Job type name under which [`RendezvousJob`] registers itself.
pub const JOB_TYPE: &str = "rendezvous";

/// Scheduler job that parks in a [`Rendezvous`] until the test releases it.
#[derive(Clone)]
pub struct RendezvousJob {
    rendezvous: Rendezvous,
}

impl RendezvousJob {
    pub fn new(rendezvous: Rendezvous) -> Self {
        Self { rendezvous }
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    /// Register this job with `scheduler` under [`JOB_TYPE`].
    pub fn register(&self, scheduler: &Scheduler) {
        scheduler.register_job_type(JOB_TYPE, Arc::new(self.clone()));
    }

    /// A non-concurrent, non-durable job definition that requests recovery.
    pub fn job_detail(key: JobKey) -> JobDetail {
        JobDetail::new(key, JOB_TYPE)
            .disallow_concurrent(true)
            .requests_recovery(true)
            .durable(false)
    }
}

#[async_trait]
impl Job for RendezvousJob {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobError> {
        debug!(job = %ctx.job_key, trigger = %ctx.trigger_key, "rendezvous job executing");
        self.rendezvous
            .enter()
            .await
            .map_err(|e| JobError::new(e.to_string()))
    }
}
