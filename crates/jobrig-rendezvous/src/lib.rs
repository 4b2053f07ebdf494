//! `jobrig-rendezvous` — deterministic "the job is running now" signalling
//! for scheduler tests.
//!
//! A [`RendezvousJob`] registered with a scheduler suspends every execution
//! inside a shared [`Rendezvous`]. The test waits for the start signal,
//! inspects the scheduler while the job is provably running, then releases
//! it:
//!
//! ```ignore
//! let rendezvous = Rendezvous::new();
//! RendezvousJob::new(rendezvous.clone()).register(&scheduler);
//! scheduler.schedule_job(&RendezvousJob::job_detail(key.clone()), &Trigger::start_now(key))?;
//!
//! rendezvous.wait_till_running().await?;
//! assert_eq!(rendezvous.running_count(), 1);
//! rendezvous.continue_running();
//! rendezvous.wait_till_idle(Duration::from_secs(5)).await?;
//! ```

pub mod error;
pub mod job;
pub mod rendezvous;

pub use error::{RendezvousError, Result};
pub use job::{RendezvousJob, JOB_TYPE};
pub use rendezvous::Rendezvous;
