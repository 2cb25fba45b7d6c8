//! Job scheduler.
//!
//! A [`JobScheduler`] turns a [`ScheduleFn`] into a blocking "give me the
//! next job" call for workers. The schedule function decides which queue to
//! take from; the scheduler decides what to do when nothing is ready:
//! give up, or idle with backoff and ask again.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::backoff::Backoff;
use super::job::Job;

/// Result of a single scheduling attempt.
#[derive(Debug)]
pub enum Scheduled {
    /// A job ready to be processed.
    Job(Box<dyn Job>),
    /// Nothing available right now; the queues are still open.
    NotReady,
    /// Every queue the function reads is closed and drained.
    Exhausted,
}

/// Policy that picks the next job from one or more queues.
#[async_trait]
pub trait ScheduleFn: Send + Sync {
    /// Makes one scheduling attempt.
    ///
    /// Implementations may wait a bounded time for a job to arrive before
    /// answering `NotReady`. They must answer `Exhausted` promptly once all
    /// of their queues are closed and drained.
    ///
    /// The returned future must be cancel-safe: workers drop it when the
    /// pool is resized or the scheduler is stopped. A job taken off a queue
    /// has to be returned from the same poll, never held across an await.
    async fn schedule(&self) -> Scheduled;
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct JobSchedulerOpts {
    /// Stop handing out jobs as soon as nothing is ready, instead of waiting
    /// for the queues to close.
    pub not_wait_new_jobs: bool,
    /// First idle delay after a `NotReady` answer.
    pub idle_min: Duration,
    /// Longest idle delay between attempts.
    pub idle_max: Duration,
}

impl Default for JobSchedulerOpts {
    fn default() -> Self {
        Self {
            not_wait_new_jobs: false,
            idle_min: Duration::from_millis(100),
            idle_max: Duration::from_secs(2),
        }
    }
}

impl JobSchedulerOpts {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to stop on the first `NotReady`.
    pub fn with_not_wait_new_jobs(mut self, not_wait: bool) -> Self {
        self.not_wait_new_jobs = not_wait;
        self
    }

    /// Sets the idle backoff bounds.
    pub fn with_idle(mut self, min: Duration, max: Duration) -> Self {
        self.idle_min = min;
        self.idle_max = max;
        self
    }
}

/// Hands jobs to workers.
pub struct JobScheduler {
    schedule: Box<dyn ScheduleFn>,
    opts: JobSchedulerOpts,
    cancel: CancellationToken,
}

impl JobScheduler {
    /// Creates a scheduler over the given schedule function.
    pub fn new(schedule: impl ScheduleFn + 'static, opts: JobSchedulerOpts) -> Self {
        Self {
            schedule: Box::new(schedule),
            opts,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the scheduler options.
    pub fn opts(&self) -> &JobSchedulerOpts {
        &self.opts
    }

    /// Returns the next job, or `None` when the worker asking should exit.
    ///
    /// `None` means the queues are exhausted, the scheduler was stopped, or
    /// nothing was ready and `not_wait_new_jobs` is set.
    pub async fn next(&self) -> Option<Box<dyn Job>> {
        let mut idle = Backoff::new(self.opts.idle_min, self.opts.idle_max, 2.0);

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                outcome = self.schedule.schedule() => outcome,
            };

            match outcome {
                Scheduled::Job(job) => return Some(job),
                Scheduled::Exhausted => return None,
                Scheduled::NotReady if self.opts.not_wait_new_jobs => return None,
                Scheduled::NotReady => {
                    let delay = idle.next();
                    trace!(delay_ms = delay.as_millis() as u64, "no job ready, idling");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Stops handing out jobs. Pending `next` calls return `None`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Returns whether `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("opts", &self.opts)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
