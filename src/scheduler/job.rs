//! Job abstractions for the scheduler.
//!
//! This module defines the seams between the scheduler and the work it runs:
//!
//! - `Job`: a unit of work a worker can process
//! - `JobStatus`: outcome of processing a job
//! - `MetricsCollector`: observer notified of discovered, succeeded and failed jobs

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// A unit of work executed by a worker.
///
/// Implementations must check `cancel` at their blocking points and return
/// promptly once it fires.
#[async_trait]
pub trait Job: Send + Sync + fmt::Debug {
    /// Runs the job to completion.
    async fn process(&self, cancel: CancellationToken) -> Result<(), JobError>;

    /// Short label used in logs and metrics.
    fn kind(&self) -> &str {
        "job"
    }
}

/// Outcome of processing a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job finished without error.
    Succeeded,
    /// Job returned an error or timed out.
    Failed,
    /// Job observed cancellation and gave up.
    Cancelled,
}

impl JobStatus {
    /// Classifies a job result.
    pub fn of(result: &Result<(), JobError>) -> Self {
        match result {
            Ok(()) => JobStatus::Succeeded,
            Err(JobError::Cancelled) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        }
    }

    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of job lifecycle events.
///
/// The worker pool reports `success` and `fail` for every processed job;
/// providers report `discover` for every job they enqueue. Implementations
/// are called concurrently from many workers.
pub trait MetricsCollector: Send + Sync {
    /// Begins collection, e.g. a periodic reporter.
    fn start(&self);

    /// Ends collection. With `immediate` false the collector may flush a
    /// final report first.
    fn stop(&self, immediate: bool);

    /// A job finished without error.
    fn success(&self, job: &dyn Job);

    /// A job returned an error.
    fn fail(&self, job: &dyn Job);

    /// A job was produced by a provider.
    fn discover(&self, job: &dyn Job);
}

/// Collector that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn start(&self) {}
    fn stop(&self, _immediate: bool) {}
    fn success(&self, _job: &dyn Job) {}
    fn fail(&self, _job: &dyn Job) {}
    fn discover(&self, _job: &dyn Job) {}
}
