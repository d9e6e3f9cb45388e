//! Restartable fixed-interval timer.
//!
//! [`PeriodicScheduler::schedule`] spawns one Tokio task that awaits each job
//! run before waiting for the next tick, so runs never overlap and missed
//! ticks are delayed rather than bunched up. Rescheduling aborts the previous
//! task first; an instance never owns two timers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::BatchError;

/// Future produced by one run of a [`ScheduledJob`].
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Job run on every tick. Called once per tick; the returned future is
/// awaited before the next tick is considered.
pub type ScheduledJob = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Fires a job every `interval` until cancelled.
#[derive(Debug, Default)]
pub struct PeriodicScheduler {
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts firing `job` every `interval`, replacing any previous schedule.
    ///
    /// The first run happens one full interval after this call. Must be called
    /// from within a Tokio runtime.
    pub fn schedule(&self, interval: Duration, job: ScheduledJob) -> Result<(), BatchError> {
        if interval.is_zero() {
            return Err(BatchError::InvalidInterval);
        }
        let runtime = Handle::try_current().map_err(|_| BatchError::NoRuntime)?;

        let mut task = lock(&self.task);
        if let Some(previous) = task.take() {
            debug!("replacing running schedule");
            previous.abort();
        }
        *task = Some(runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!("scheduler tick");
                job().await;
            }
        }));
        debug!(interval = ?interval, "schedule started");
        Ok(())
    }

    /// Stops the schedule. Returns `false` if nothing was scheduled.
    ///
    /// A job run in progress is aborted at its next await point.
    pub fn cancel(&self) -> bool {
        match lock(&self.task).take() {
            Some(task) => {
                task.abort();
                debug!("schedule cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
