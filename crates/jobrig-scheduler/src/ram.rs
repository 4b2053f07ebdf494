use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::types::{JobDetail, JobKey, Trigger, TriggerKey, TriggerState};

#[derive(Default)]
struct RamState {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, Trigger>,
}

/// In-memory job store. Nothing survives the process.
#[derive(Default)]
pub struct RamJobStore {
    state: Mutex<RamState>,
}

impl RamJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for RamJobStore {
    fn store_job_and_trigger(&self, job: &JobDetail, trigger: &Trigger) -> Result<()> {
        let mut state = self.state.lock().expect("job store poisoned");
        if state.jobs.contains_key(&job.key) {
            return Err(SchedulerError::JobAlreadyExists {
                key: job.key.clone(),
            });
        }
        state.jobs.insert(job.key.clone(), job.clone());
        state.triggers.insert(trigger.key.clone(), trigger.clone());
        Ok(())
    }

    fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        let state = self.state.lock().expect("job store poisoned");
        Ok(state.jobs.get(key).cloned())
    }

    fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut state = self.state.lock().expect("job store poisoned");
        state.triggers.retain(|_, t| &t.job_key != key);
        Ok(state.jobs.remove(key).is_some())
    }

    fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<Trigger>> {
        let state = self.state.lock().expect("job store poisoned");
        Ok(state
            .triggers
            .values()
            .filter(|t| &t.job_key == key)
            .cloned()
            .collect())
    }

    fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState> {
        let state = self.state.lock().expect("job store poisoned");
        Ok(state
            .triggers
            .get(key)
            .map(|t| t.state)
            .unwrap_or(TriggerState::None))
    }

    fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
        let state = self.state.lock().expect("job store poisoned");
        let mut due: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| t.state == TriggerState::Normal && t.next_fire.is_some_and(|n| n <= now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_fire);
        Ok(due)
    }

    fn trigger_fired(
        &self,
        key: &TriggerKey,
        fired_at: DateTime<Utc>,
        next_fire: Option<DateTime<Utc>>,
        new_state: TriggerState,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("job store poisoned");
        if let Some(trigger) = state.triggers.get_mut(key) {
            trigger.prev_fire = Some(fired_at);
            trigger.next_fire = next_fire;
            trigger.fire_count += 1;
            trigger.state = new_state;
        }
        Ok(())
    }

    fn transition_job_triggers(
        &self,
        job: &JobKey,
        from: TriggerState,
        to: TriggerState,
    ) -> Result<usize> {
        let mut state = self.state.lock().expect("job store poisoned");
        let mut n = 0;
        for trigger in state
            .triggers
            .values_mut()
            .filter(|t| &t.job_key == job && t.state == from)
        {
            trigger.state = to;
            n += 1;
        }
        Ok(n)
    }

    fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let mut state = self.state.lock().expect("job store poisoned");
        Ok(state.triggers.remove(key).is_some())
    }

    fn recover_blocked(&self) -> Result<usize> {
        let mut state = self.state.lock().expect("job store poisoned");
        let mut n = 0;
        for trigger in state
            .triggers
            .values_mut()
            .filter(|t| t.state == TriggerState::Blocked)
        {
            trigger.state = TriggerState::Normal;
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schedule;

    fn job(name: &str) -> JobDetail {
        JobDetail::new(JobKey::new(name), "noop")
    }

    #[test]
    fn duplicate_job_is_rejected() {
        let store = RamJobStore::new();
        let key = JobKey::new("test");
        store
            .store_job_and_trigger(&job("test"), &Trigger::start_now(key.clone()))
            .unwrap();

        let err = store
            .store_job_and_trigger(&job("test"), &Trigger::start_now(key))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::JobAlreadyExists { .. }));
    }

    #[test]
    fn fire_and_block_cycle() {
        let store = RamJobStore::new();
        let key = JobKey::new("test");
        let trigger = Trigger::start_now(key.clone());
        store.store_job_and_trigger(&job("test"), &trigger).unwrap();

        let due = store.due_triggers(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);

        store
            .trigger_fired(&trigger.key, Utc::now(), None, TriggerState::Blocked)
            .unwrap();
        assert_eq!(store.trigger_state(&trigger.key).unwrap(), TriggerState::Blocked);
        assert!(store.due_triggers(Utc::now()).unwrap().is_empty());

        assert_eq!(store.recover_blocked().unwrap(), 1);
        assert_eq!(store.trigger_state(&trigger.key).unwrap(), TriggerState::Normal);
    }

    #[test]
    fn future_triggers_are_not_due() {
        let store = RamJobStore::new();
        let key = JobKey::new("later");
        let trigger = Trigger::new(
            TriggerKey::new("later"),
            key,
            Schedule::Once {
                at: Utc::now() + chrono::Duration::hours(1),
            },
        );
        store.store_job_and_trigger(&job("later"), &trigger).unwrap();
        assert!(store.due_triggers(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn remove_job_drops_its_triggers() {
        let store = RamJobStore::new();
        let key = JobKey::new("test");
        let trigger = Trigger::start_now(key.clone());
        store.store_job_and_trigger(&job("test"), &trigger).unwrap();

        assert!(store.remove_job(&key).unwrap());
        assert!(!store.remove_job(&key).unwrap());
        assert_eq!(store.trigger_state(&trigger.key).unwrap(), TriggerState::None);
        assert!(store.triggers_of_job(&key).unwrap().is_empty());
    }
}
