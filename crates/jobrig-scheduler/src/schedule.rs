use chrono::{DateTime, Duration, Utc};

use crate::types::Schedule;

/// Longest interval a `Duration` can hold (it counts milliseconds in an `i64`).
pub const MAX_INTERVAL_SECS: u64 = i64::MAX as u64 / 1000;

/// First fire time of a freshly stored trigger.
///
/// A `Once` instant in the past still fires (immediately); interval triggers
/// fire right away and then every `every_secs`.
pub fn first_fire_time(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => Some(*at),
        Schedule::Interval { .. } => Some(now),
    }
}

/// Compute the next UTC fire time for `schedule` strictly *after* `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` trigger whose
/// instant is not in the future) or the next instant is past the range of
/// `DateTime<Utc>`.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Interval { every_secs } => {
            let secs = i64::try_from(*every_secs).ok()?;
            from.checked_add_signed(Duration::try_seconds(secs)?)
        }
    }
}

/// Reject schedules the engine cannot drive.
pub fn validate(schedule: &Schedule) -> crate::error::Result<()> {
    match schedule {
        Schedule::Interval { every_secs: 0 } => Err(crate::error::SchedulerError::InvalidSchedule(
            "interval must be at least one second".to_string(),
        )),
        Schedule::Interval { every_secs } if *every_secs > MAX_INTERVAL_SECS => {
            Err(crate::error::SchedulerError::InvalidSchedule(format!(
                "interval of {every_secs}s exceeds the maximum of {MAX_INTERVAL_SECS}s"
            )))
        }
        _ => Ok(()),
    }
}
