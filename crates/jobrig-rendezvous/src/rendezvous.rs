use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobrig_core::config::RendezvousConfig;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::error::{RendezvousError, Result};

struct Shared {
    running: AtomicUsize,
    /// One permit per execution that has started.
    started: Semaphore,
    /// One permit per `continue_running` call.
    proceed: Semaphore,
    /// Signalled whenever `running` drops.
    idle: Notify,
}

/// Shared rendezvous state between background executions and a test.
///
/// Clones share the same counter and gates, so one handle can be injected
/// into a job and kept by the test that controls it. Independent tests
/// should each build their own handle.
///
/// Permits accumulate: a start signalled before anyone waits is still seen
/// by the next [`wait_till_running`](Self::wait_till_running), and nothing
/// is reset between executions.
#[derive(Clone)]
pub struct Rendezvous {
    shared: Arc<Shared>,
    wait_timeout: Option<Duration>,
    continue_timeout: Option<Duration>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::from_config(&RendezvousConfig::default())
    }
}

impl Rendezvous {
    /// A handle with the default bounds (waits for a start fail after 30s).
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle whose waits never time out.
    pub fn unbounded() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicUsize::new(0),
                started: Semaphore::new(0),
                proceed: Semaphore::new(0),
                idle: Notify::new(),
            }),
            wait_timeout: None,
            continue_timeout: None,
        }
    }

    pub fn from_config(config: &RendezvousConfig) -> Self {
        Self {
            wait_timeout: config.wait_timeout(),
            continue_timeout: config.continue_timeout(),
            ..Self::unbounded()
        }
    }

    /// Bound [`wait_till_running`](Self::wait_till_running) on this handle.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Bound how long an execution stays suspended in [`enter`](Self::enter).
    pub fn with_continue_timeout(mut self, timeout: Duration) -> Self {
        self.continue_timeout = Some(timeout);
        self
    }

    /// Body of a rendezvous execution.
    ///
    /// Counts itself as running, signals that it started, then suspends
    /// until [`continue_running`](Self::continue_running) releases it. The
    /// count is decremented on every exit: normal return, timeout, a closed
    /// rendezvous, or the future being dropped mid-wait.
    pub async fn enter(&self) -> Result<()> {
        let _running = RunningGuard::acquire(&self.shared);
        self.shared.started.add_permits(1);
        debug!(running = self.running_count(), "rendezvous job started");

        let acquire = self.shared.proceed.acquire();
        let permit = match self.continue_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                RendezvousError::NeverContinued {
                    waited_ms: millis(limit),
                }
            })?,
            None => acquire.await,
        }
        .map_err(|_| RendezvousError::Closed)?;
        permit.forget();

        debug!("rendezvous job continuing");
        Ok(())
    }

    /// Wait until an execution has started, consuming one start signal.
    ///
    /// Bounded by the handle's wait timeout, if it has one.
    pub async fn wait_till_running(&self) -> Result<()> {
        match self.wait_timeout {
            Some(limit) => self.wait_till_running_for(limit).await,
            None => self.wait_till_running_unbounded().await,
        }
    }

    /// Like [`wait_till_running`](Self::wait_till_running) with an explicit bound.
    pub async fn wait_till_running_for(&self, limit: Duration) -> Result<()> {
        tokio::time::timeout(limit, self.wait_till_running_unbounded())
            .await
            .map_err(|_| RendezvousError::NeverStarted {
                waited_ms: millis(limit),
            })?
    }

    /// Wait for a start signal with no bound at all.
    pub async fn wait_till_running_unbounded(&self) -> Result<()> {
        self.shared
            .started
            .acquire()
            .await
            .map_err(|_| RendezvousError::Closed)?
            .forget();
        Ok(())
    }

    /// Release exactly one suspended execution (or the next one to suspend).
    ///
    /// Which of several suspended executions proceeds is unspecified.
    pub fn continue_running(&self) {
        self.shared.proceed.add_permits(1);
    }

    /// Number of executions between start and finish right now.
    pub fn running_count(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Wait until no execution is running.
    pub async fn wait_till_idle(&self, limit: Duration) -> Result<()> {
        let idle = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                // Register before checking so a decrement in between is not missed.
                notified.as_mut().enable();
                if self.running_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, idle)
            .await
            .map_err(|_| RendezvousError::NeverIdle {
                running: self.running_count(),
                waited_ms: millis(limit),
            })
    }

    /// Close both gates. Suspended executions and waiters fail with
    /// [`RendezvousError::Closed`]; running executions still count down.
    pub fn close(&self) {
        self.shared.started.close();
        self.shared.proceed.close();
    }
}

/// Marks one execution as running for as long as it lives.
struct RunningGuard<'a> {
    shared: &'a Shared,
}

impl<'a> RunningGuard<'a> {
    fn acquire(shared: &'a Shared) -> Self {
        shared.running.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.shared.running.fetch_sub(1, Ordering::SeqCst);
        self.shared.idle.notify_waiters();
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUND: Duration = Duration::from_secs(5);

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_execution_counts_up_and_down() {
        let rendezvous = Rendezvous::new();
        let job = rendezvous.clone();
        let handle = tokio::spawn(async move { job.enter().await });

        assert_eq!(rendezvous.wait_till_running_for(BOUND).await, Ok(()));
        assert_eq!(rendezvous.running_count(), 1);

        rendezvous.continue_running();
        rendezvous.wait_till_idle(BOUND).await.unwrap();
        assert_eq!(rendezvous.running_count(), 0);
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_executions_share_the_counter() {
        const N: usize = 5;
        let rendezvous = Rendezvous::new();
        let handles: Vec<_> = (0..N)
            .map(|_| {
                let job = rendezvous.clone();
                tokio::spawn(async move { job.enter().await })
            })
            .collect();

        for _ in 0..N {
            rendezvous.wait_till_running_for(BOUND).await.unwrap();
        }
        assert_eq!(rendezvous.running_count(), N);

        // Each continue releases exactly one execution.
        rendezvous.continue_running();
        tokio::time::timeout(BOUND, async {
            while rendezvous.running_count() != N - 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        for _ in 1..N {
            rendezvous.continue_running();
        }
        rendezvous.wait_till_idle(BOUND).await.unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn continue_before_suspend_is_not_lost() {
        let rendezvous = Rendezvous::new();
        rendezvous.continue_running();

        rendezvous.enter().await.unwrap();
        rendezvous.wait_till_running_for(BOUND).await.unwrap();
        assert_eq!(rendezvous.running_count(), 0);
    }

    #[tokio::test]
    async fn wait_fails_instead_of_hanging_when_nothing_starts() {
        let rendezvous = Rendezvous::new().with_wait_timeout(Duration::from_millis(20));

        let err = rendezvous.wait_till_running().await.unwrap_err();
        assert_eq!(err, RendezvousError::NeverStarted { waited_ms: 20 });
        assert!(err.to_string().starts_with("rendezvous never occurred"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_execution_still_decrements() {
        let rendezvous = Rendezvous::new();
        let job = rendezvous.clone();
        let handle = tokio::spawn(async move { job.enter().await });

        rendezvous.wait_till_running_for(BOUND).await.unwrap();
        assert_eq!(rendezvous.running_count(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(rendezvous.running_count(), 0);
    }

    #[tokio::test]
    async fn continue_timeout_releases_the_slot() {
        let rendezvous = Rendezvous::new().with_continue_timeout(Duration::from_millis(20));

        let err = rendezvous.enter().await.unwrap_err();
        assert_eq!(err, RendezvousError::NeverContinued { waited_ms: 20 });
        assert_eq!(rendezvous.running_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_wakes_suspended_executions() {
        let rendezvous = Rendezvous::unbounded();
        let job = rendezvous.clone();
        let handle = tokio::spawn(async move { job.enter().await });
        rendezvous.wait_till_running_for(BOUND).await.unwrap();

        rendezvous.close();
        assert_eq!(handle.await.unwrap(), Err(RendezvousError::Closed));
        assert_eq!(rendezvous.running_count(), 0);
        assert_eq!(
            rendezvous.wait_till_running().await,
            Err(RendezvousError::Closed)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_wait_reports_what_is_still_running() {
        let rendezvous = Rendezvous::new();
        let job = rendezvous.clone();
        let handle = tokio::spawn(async move { job.enter().await });
        rendezvous.wait_till_running_for(BOUND).await.unwrap();

        let err = rendezvous
            .wait_till_idle(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RendezvousError::NeverIdle {
                running: 1,
                waited_ms: 20
            }
        );

        rendezvous.continue_running();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn config_bounds_are_applied() {
        let config = RendezvousConfig {
            wait_timeout_ms: 0,
            continue_timeout_ms: 250,
        };
        let rendezvous = Rendezvous::from_config(&config);
        assert_eq!(rendezvous.wait_timeout, None);
        assert_eq!(rendezvous.continue_timeout, Some(Duration::from_millis(250)));
    }
}
