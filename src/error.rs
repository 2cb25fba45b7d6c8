//! Error types for gitcollector operations.
//!
//! Defines error types for the major subsystems:
//! - Provider lifecycle and discovery outcomes
//! - Job execution
//! - Git library operations (clone, update)

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification of provider errors.
///
/// Callers compare provider errors by kind, never by message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The provider terminated, either on request or because its source
    /// ran dry and it was configured not to wait.
    ProviderStopped,
    /// The provider did not acknowledge a stop request in time.
    ProviderStop,
    /// A discovered repository exposes no usable endpoint.
    EndpointsNotFound,
    /// The source has no new repositories right now.
    NewRepositoriesNotFound,
    /// The source refused requests because of rate limiting.
    RateLimitExceeded,
    /// Any other discovery failure.
    Discovery,
}

impl ErrorKind {
    /// Returns the human-readable message for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProviderStopped => "provider stopped",
            ErrorKind::ProviderStop => "provider failed on stop",
            ErrorKind::EndpointsNotFound => "endpoints not found",
            ErrorKind::NewRepositoriesNotFound => "couldn't find new repositories",
            ErrorKind::RateLimitExceeded => "rate limit requests exceeded",
            ErrorKind::Discovery => "discovery failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error produced by a discovery provider.
#[derive(Debug, Error)]
#[error("{kind}{}", repository_suffix(.repository))]
pub struct ProviderError {
    kind: ErrorKind,
    repository: Option<String>,
    #[source]
    source: Option<BoxError>,
}

fn repository_suffix(repository: &Option<String>) -> String {
    repository
        .as_deref()
        .map(|name| format!(": {name}"))
        .unwrap_or_default()
}

impl ProviderError {
    /// Creates an error of the given kind with no cause.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            repository: None,
            source: None,
        }
    }

    /// Creates an error of the given kind caused by `source`.
    pub fn wrap(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            repository: None,
            source: Some(source.into()),
        }
    }

    /// Requested or unrecoverable termination of the provider.
    pub fn stopped() -> Self {
        Self::new(ErrorKind::ProviderStopped)
    }

    /// Termination of the provider caused by another provider error.
    pub fn stopped_by(cause: ProviderError) -> Self {
        Self::wrap(ErrorKind::ProviderStopped, cause)
    }

    /// Stop acknowledgement did not arrive in time.
    pub fn stop_failed(timeout: Duration) -> Self {
        Self::wrap(
            ErrorKind::ProviderStop,
            format!("no acknowledgement within {timeout:?}"),
        )
    }

    /// The named repository has no usable endpoint.
    pub fn endpoints_not_found(repository: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::EndpointsNotFound,
            repository: Some(repository.into()),
            source: None,
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns whether this error is of the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Returns the repository the error refers to, if any.
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Returns the kind of the wrapped provider error, if the cause is one.
    pub fn cause_kind(&self) -> Option<ErrorKind> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<ProviderError>())
            .map(ProviderError::kind)
    }
}

/// Errors that can occur while a worker processes a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("No process function attached to {kind} job")]
    NotScheduled { kind: String },

    #[error("Job has no endpoints")]
    NoEndpoints,

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Job failed: {0}")]
    Failed(String),
}

/// Errors that can occur during git library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Repository '{0}' is not in the library")]
    RepositoryNotFound(String),

    #[error("git {operation} failed for {endpoint}: {stderr}")]
    Git {
        operation: String,
        endpoint: String,
        stderr: String,
    },

    #[error("All {attempts} endpoints failed for '{repository}'")]
    AllEndpointsFailed {
        repository: String,
        attempts: usize,
        #[source]
        last: Box<LibraryError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
