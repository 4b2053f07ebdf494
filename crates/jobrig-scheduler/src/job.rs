use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::JobError;
use crate::types::{JobKey, TriggerKey};

/// Everything a job learns about the fire that started it.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    /// Unique id of this particular execution.
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
    /// 1 for the trigger's first fire.
    pub fire_count: u32,
}

/// A unit of work executed by the scheduler on one of its worker tasks.
///
/// Executions may be dropped at any await point when the scheduler aborts
/// them, so cleanup belongs in guards rather than after the last await.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobError>;
}

/// Maps `JobDetail::job_type` names to job implementations.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation for `job_type`.
    pub fn register(&self, job_type: impl Into<String>, job: Arc<dyn Job>) {
        let job_type = job_type.into();
        debug!(%job_type, "job type registered");
        self.jobs
            .write()
            .expect("job registry poisoned")
            .insert(job_type, job);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Job>> {
        self.jobs
            .read()
            .expect("job registry poisoned")
            .get(job_type)
            .cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs
            .read()
            .expect("job registry poisoned")
            .contains_key(job_type)
    }
}
