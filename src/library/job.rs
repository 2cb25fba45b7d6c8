//! Library jobs: download or update one repository.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::JobError;
use crate::scheduler::Job;

/// What a library job does with its repository.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch a repository that is not in the library yet.
    Download,
    /// Refresh a repository already in the library.
    Update,
}

impl JobKind {
    /// Returns the label used in logs, metrics and queue names.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Update => "update",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function that performs a library job.
pub type ProcessFn =
    Arc<dyn Fn(CancellationToken, LibraryJob) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Wraps an async closure into a [`ProcessFn`].
pub fn process_fn<F, Fut>(f: F) -> ProcessFn
where
    F: Fn(CancellationToken, LibraryJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    Arc::new(move |cancel, job| f(cancel, job).boxed())
}

/// A repository download or update.
///
/// Providers create jobs with endpoints only; the schedule function attaches
/// the process function for the job's kind when it hands the job out.
#[derive(Clone)]
pub struct LibraryJob {
    /// Unique job identifier.
    pub id: Uuid,
    /// Download or update.
    pub kind: JobKind,
    /// Remote URLs of the repository, in order of preference.
    pub endpoints: Vec<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    process: Option<ProcessFn>,
}

impl LibraryJob {
    /// Creates a job of the given kind.
    pub fn new(kind: JobKind, endpoints: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            endpoints,
            created_at: Utc::now(),
            process: None,
        }
    }

    /// Creates a download job.
    pub fn download(endpoints: Vec<String>) -> Self {
        Self::new(JobKind::Download, endpoints)
    }

    /// Creates an update job.
    pub fn update(endpoints: Vec<String>) -> Self {
        Self::new(JobKind::Update, endpoints)
    }

    /// Attaches the function that performs this job.
    pub fn with_process_fn(mut self, process: ProcessFn) -> Self {
        self.process = Some(process);
        self
    }

    /// Returns whether a process function is attached.
    pub fn is_scheduled(&self) -> bool {
        self.process.is_some()
    }

    /// Returns the preferred endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoints.first().map(String::as_str)
    }
}

impl fmt::Debug for LibraryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryJob")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("endpoints", &self.endpoints)
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

#[async_trait]
impl Job for LibraryJob {
    async fn process(&self, cancel: CancellationToken) -> Result<(), JobError> {
        let process = self.process.clone().ok_or_else(|| JobError::NotScheduled {
            kind: self.kind.to_string(),
        })?;

        if self.endpoints.is_empty() {
            return Err(JobError::NoEndpoints);
        }

        process(cancel, self.clone()).await
    }

    fn kind(&self) -> &str {
        self.kind.as_str()
    }
}
