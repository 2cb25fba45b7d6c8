//! Worker pool for processing scheduled jobs.
//!
//! This module provides a pool of workers that take jobs from a shared
//! [`JobScheduler`]. Each worker runs as an independent async task, asks the
//! scheduler for a job, processes it, reports the outcome to the metrics
//! collector, and asks again until the scheduler runs dry.
//!
//! # Features
//!
//! - Resizable at any time with `set_workers`
//! - Barrier-style `wait` until every worker has exited
//! - Graceful or immediate stop through cancellation tokens
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::JobError;

use super::job::{Job, JobStatus, MetricsCollector};
use super::schedule::JobScheduler;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// No async runtime to spawn workers on.
    #[error("Worker pool must be started inside a tokio runtime")]
    NoRuntime,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn on `run`.
    pub num_workers: usize,
    /// Maximum time allowed for processing a single job. `None` lets jobs
    /// run until they finish or are cancelled.
    pub job_timeout: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            job_timeout: None,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Target number of workers.
    pub num_workers: usize,
    /// Number of worker tasks still alive.
    pub live_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of jobs that failed.
    pub jobs_failed: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, status: JobStatus, duration: Duration) {
        match status {
            JobStatus::Succeeded => self.jobs_completed.fetch_add(1, Ordering::SeqCst),
            JobStatus::Failed | JobStatus::Cancelled => {
                self.jobs_failed.fetch_add(1, Ordering::SeqCst)
            }
        };
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize, live_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            live_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// State shared between the pool handle and its workers.
struct PoolShared {
    scheduler: Arc<JobScheduler>,
    metrics: Arc<dyn MetricsCollector>,
    job_timeout: Option<Duration>,
    /// Desired number of workers. Watched by idle workers.
    target: watch::Sender<usize>,
    /// Number of worker tasks alive. Watched by `wait`.
    live: watch::Sender<usize>,
    /// Parent of every per-job token; cancelled on immediate stop.
    jobs: CancellationToken,
    stats: SharedPoolStats,
}

impl PoolShared {
    fn live(&self) -> usize {
        *self.live.borrow()
    }

    fn target(&self) -> usize {
        *self.target.borrow()
    }
}

/// Pool of workers draining a job scheduler.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new, idle worker pool.
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Source of jobs for every worker
    /// * `metrics` - Collector notified of every processed job
    /// * `config` - Pool configuration
    pub fn new(
        scheduler: JobScheduler,
        metrics: Arc<dyn MetricsCollector>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (live, _) = watch::channel(0);
        let (target, _) = watch::channel(config.num_workers);

        Self {
            shared: Arc::new(PoolShared {
                scheduler: Arc::new(scheduler),
                metrics,
                job_timeout: config.job_timeout,
                target,
                live,
                jobs: CancellationToken::new(),
                stats: SharedPoolStats::new(),
            }),
            handles: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
            is_running: AtomicBool::new(false),
        }
    }

    /// Sets the desired number of workers.
    ///
    /// Before `run` this only records the target. While running, missing
    /// workers are spawned immediately and surplus workers exit the next time
    /// they are between jobs; in-flight jobs are never interrupted.
    pub fn set_workers(&self, num_workers: usize) {
        let previous = self.shared.target.send_replace(num_workers);
        if previous != num_workers {
            info!(current = previous, target = num_workers, "Scaling worker pool");
        }

        if !self.is_running() {
            return;
        }

        let live = self.shared.live();
        if num_workers > live {
            if let Err(e) = self.spawn_workers(num_workers - live) {
                error!(error = %e, "Failed to spawn workers");
            }
        }
    }

    /// Starts the configured number of workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` on a second call and
    /// `PoolError::NoRuntime` outside a tokio runtime.
    pub fn run(&self) -> Result<(), PoolError> {
        tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let num_workers = self.shared.target();
        self.spawn_workers(num_workers)?;
        info!(num_workers = num_workers, "Worker pool started");

        Ok(())
    }

    /// Waits until every worker has exited.
    ///
    /// Safe to call several times and from several tasks; returns at once
    /// when no worker is alive.
    pub async fn wait(&self) {
        loop {
            let handles = std::mem::take(
                &mut *self
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                break;
            }

            for result in join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Worker task panicked");
                }
            }
        }

        // Handles may be owned by a concurrent `wait`.
        let mut live = self.shared.live.subscribe();
        let _ = live.wait_for(|n| *n == 0).await;
    }

    /// Stops the pool.
    ///
    /// Workers stop asking for jobs. With `immediate` set, in-flight jobs are
    /// also cancelled; otherwise they run to completion. Use `wait` to block
    /// until the workers are gone.
    pub fn stop(&self, immediate: bool) {
        info!(immediate = immediate, "Stopping worker pool");

        self.shared.scheduler.stop();
        if immediate {
            self.shared.jobs.cancel();
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.shared
            .stats
            .to_pool_stats(self.shared.target(), self.shared.live())
    }

    /// Returns whether `run` has been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the target number of workers.
    pub fn num_workers(&self) -> usize {
        self.shared.target()
    }

    fn spawn_workers(&self, count: usize) -> Result<(), PoolError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.retain(|handle| !handle.is_finished());

        for _ in 0..count {
            let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
            let worker = Worker::new(format!("worker-{}", id), Arc::clone(&self.shared));
            handles.push(runtime.spawn(worker.run()));
        }

        Ok(())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("is_running", &self.is_running())
            .finish()
    }
}

/// A single worker that processes jobs from the scheduler.
struct Worker {
    /// Unique identifier for this worker.
    id: String,
    /// Pool state.
    shared: Arc<PoolShared>,
    /// Wakes the worker when the pool is resized.
    target_rx: watch::Receiver<usize>,
    /// Set once this worker removed itself from the live count.
    retired: bool,
}

impl Worker {
    /// Creates a worker and counts it as live.
    fn new(id: String, shared: Arc<PoolShared>) -> Self {
        shared.live.send_modify(|n| *n += 1);
        let target_rx = shared.target.subscribe();
        Self {
            id,
            shared,
            target_rx,
            retired: false,
        }
    }

    /// Main worker loop.
    ///
    /// Takes jobs until the scheduler runs dry or the pool shrinks below
    /// this worker.
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            if self.retire_if_surplus() {
                debug!(worker_id = %self.id, "Worker retired by resize");
                break;
            }

            let next = tokio::select! {
                next = self.shared.scheduler.next() => next,
                // Resized while idle: re-check before asking again.
                Ok(()) = self.target_rx.changed() => continue,
            };

            match next {
                Some(job) => self.process_job(job).await,
                None => break,
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    /// Leaves the pool if more workers are alive than the target.
    fn retire_if_surplus(&mut self) -> bool {
        let target = *self.target_rx.borrow_and_update();
        let retired = self.shared.live.send_if_modified(|n| {
            if *n > target {
                *n -= 1;
                true
            } else {
                false
            }
        });
        self.retired = retired;
        retired
    }

    /// Processes a single job.
    async fn process_job(&self, job: Box<dyn Job>) {
        let cancel = self.shared.jobs.child_token();
        let start = Instant::now();

        self.shared.stats.increment_active();

        let result = match self.shared.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, job.process(cancel.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(JobError::Timeout(limit))
                }
            },
            None => job.process(cancel).await,
        };

        self.shared.stats.decrement_active();

        let duration = start.elapsed();
        let status = JobStatus::of(&result);
        self.shared.stats.record(status, duration);

        match result {
            Ok(()) => {
                self.shared.metrics.success(job.as_ref());
                debug!(
                    worker_id = %self.id,
                    kind = job.kind(),
                    duration_ms = duration.as_millis() as u64,
                    "Job completed"
                );
            }
            Err(e) => {
                self.shared.metrics.fail(job.as_ref());
                warn!(
                    worker_id = %self.id,
                    kind = job.kind(),
                    status = %status,
                    error = %e,
                    "Job failed"
                );
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.retired {
            self.shared.live.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}
