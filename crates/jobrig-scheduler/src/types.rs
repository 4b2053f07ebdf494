use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Group used when a key is created without one.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Identity of a stored job: name + group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Identity of a stored trigger: name + group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// A key with a random name in the default group.
    pub fn unique() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Defines when and how often a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire exactly once at the given UTC instant (immediately if it has passed).
    Once { at: DateTime<Utc> },

    /// Fire repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },
}

/// Lifecycle state of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// The trigger is not stored (never scheduled or already removed).
    None,
    /// Waiting for its next fire time.
    Normal,
    /// Paused; will not fire until resumed.
    Paused,
    /// No further fire times remain.
    Complete,
    /// The job type could not be resolved when the trigger fired.
    Error,
    /// The trigger's job disallows concurrent execution and is running.
    Blocked,
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerState::None => "none",
            TriggerState::Normal => "normal",
            TriggerState::Paused => "paused",
            TriggerState::Complete => "complete",
            TriggerState::Error => "error",
            TriggerState::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(TriggerState::None),
            "normal" => Ok(TriggerState::Normal),
            "paused" => Ok(TriggerState::Paused),
            "complete" => Ok(TriggerState::Complete),
            "error" => Ok(TriggerState::Error),
            "blocked" => Ok(TriggerState::Blocked),
            other => Err(format!("unknown trigger state: {other}")),
        }
    }
}

/// A stored job definition. The implementation is looked up by `job_type`
/// in the scheduler's registry at fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    /// Name under which the implementation was registered.
    pub job_type: String,
    pub description: Option<String>,
    /// Durable jobs stay stored after their last trigger is gone.
    pub durable: bool,
    /// Re-fire after an unclean shutdown interrupted an execution.
    pub requests_recovery: bool,
    /// At most one execution per job key at a time.
    pub disallow_concurrent: bool,
}

impl JobDetail {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            description: None,
            durable: false,
            requests_recovery: false,
            disallow_concurrent: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn requests_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    pub fn disallow_concurrent(mut self, disallow: bool) -> Self {
        self.disallow_concurrent = disallow;
        self
    }
}

/// A stored trigger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: Schedule,
    pub state: TriggerState,
    /// Next planned fire time; `None` once the schedule is exhausted.
    pub next_fire: Option<DateTime<Utc>>,
    pub prev_fire: Option<DateTime<Utc>>,
    pub fire_count: u32,
    /// If set, the trigger completes after this many fires.
    pub max_fires: Option<u32>,
}

impl Trigger {
    /// A trigger with a random key that fires once, immediately.
    pub fn start_now(job_key: JobKey) -> Self {
        Self::new(
            TriggerKey::unique(),
            job_key,
            Schedule::Once { at: Utc::now() },
        )
    }

    pub fn new(key: TriggerKey, job_key: JobKey, schedule: Schedule) -> Self {
        let next_fire = crate::schedule::first_fire_time(&schedule, Utc::now());
        Self {
            key,
            job_key,
            schedule,
            state: TriggerState::Normal,
            next_fire,
            prev_fire: None,
            fire_count: 0,
            max_fires: None,
        }
    }

    pub fn with_max_fires(mut self, max_fires: u32) -> Self {
        self.max_fires = Some(max_fires);
        self
    }

    /// Compute the follow-up fire time after firing at `fired_at`.
    pub fn next_after_fire(&self, fired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let fired = self.fire_count + 1;
        if self.max_fires.is_some_and(|m| fired >= m) {
            return None;
        }
        crate::schedule::compute_next_run(&self.schedule, fired_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_default_to_the_default_group() {
        let key = JobKey::new("test");
        assert_eq!(key.group, DEFAULT_GROUP);
        assert_eq!(key.to_string(), "DEFAULT.test");
    }

    #[test]
    fn unique_trigger_keys_differ() {
        assert_ne!(TriggerKey::unique(), TriggerKey::unique());
    }

    #[test]
    fn trigger_state_round_trips_through_text() {
        for state in [
            TriggerState::None,
            TriggerState::Normal,
            TriggerState::Paused,
            TriggerState::Complete,
            TriggerState::Error,
            TriggerState::Blocked,
        ] {
            assert_eq!(state.to_string().parse::<TriggerState>().unwrap(), state);
        }
        assert!("fired".parse::<TriggerState>().is_err());
    }

    #[test]
    fn start_now_fires_once() {
        let trigger = Trigger::start_now(JobKey::new("test"));
        assert_eq!(trigger.state, TriggerState::Normal);
        let first = trigger.next_fire.expect("immediate trigger has a fire time");
        assert!(first <= Utc::now());
        assert_eq!(trigger.next_after_fire(first), None);
    }

    #[test]
    fn max_fires_exhausts_interval_trigger() {
        let trigger = Trigger::new(
            TriggerKey::new("every-minute"),
            JobKey::new("test"),
            Schedule::Interval { every_secs: 60 },
        )
        .with_max_fires(1);
        assert_eq!(trigger.next_after_fire(Utc::now()), None);
    }
}
