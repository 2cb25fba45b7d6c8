//! Discovery provider: turns repositories into download jobs.
//!
//! A provider pulls repositories from a [`RepositoryIter`], resolves an
//! endpoint for each, and enqueues a download job. When the queue stays full
//! past the enqueue timeout the job goes to a bounded retry buffer, which is
//! drained before asking the source for more.
//!
//! Stopping uses a handshake: [`ProviderHandle::stop`] cancels the provider
//! and waits for it to acknowledge, failing if no acknowledgement arrives
//! within the stop timeout.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ProviderError};
use crate::library::LibraryJob;
use crate::scheduler::{Backoff, JobQueue, MetricsCollector, QueueError, SendError};

use super::types::{DiscoveryError, Repository, RepositoryIter};

/// Default time to wait for a stop acknowledgement.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time to wait for a free queue slot.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a discovery provider.
#[derive(Debug, Clone)]
pub struct ProviderOpts {
    /// Keep polling when the source runs out of repositories.
    pub wait_new_repos: bool,
    /// Keep going through rate limits instead of stopping.
    pub wait_on_rate_limit: bool,
    /// Maximum time `stop` waits for acknowledgement.
    pub stop_timeout: Duration,
    /// Maximum time to wait for a free queue slot.
    pub enqueue_timeout: Duration,
    /// Retry buffer capacity. Zero means twice the queue capacity.
    pub max_job_buffer: usize,
}

impl Default for ProviderOpts {
    fn default() -> Self {
        Self {
            wait_new_repos: false,
            wait_on_rate_limit: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            max_job_buffer: 0,
        }
    }
}

impl ProviderOpts {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to wait for new repositories.
    pub fn with_wait_new_repos(mut self, wait: bool) -> Self {
        self.wait_new_repos = wait;
        self
    }

    /// Sets whether to wait through rate limits.
    pub fn with_wait_on_rate_limit(mut self, wait: bool) -> Self {
        self.wait_on_rate_limit = wait;
        self
    }

    /// Sets the stop timeout. Zero keeps the default.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the enqueue timeout. Zero keeps the default.
    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Sets the retry buffer capacity. Zero derives it from the queue.
    pub fn with_max_job_buffer(mut self, max: usize) -> Self {
        self.max_job_buffer = max;
        self
    }

    fn normalized(mut self, queue_capacity: usize) -> Self {
        if self.stop_timeout.is_zero() {
            self.stop_timeout = DEFAULT_STOP_TIMEOUT;
        }
        if self.enqueue_timeout.is_zero() {
            self.enqueue_timeout = DEFAULT_ENQUEUE_TIMEOUT;
        }
        if self.max_job_buffer == 0 {
            self.max_job_buffer = queue_capacity.saturating_mul(2);
        }
        self
    }
}

/// Picks the endpoint for a repository: web URL, then git URL, then SSH URL.
///
/// # Errors
///
/// Returns an `EndpointsNotFound` error naming the repository when none is set.
pub fn resolve_endpoint(repo: &Repository) -> Result<String, ProviderError> {
    [&repo.html_url, &repo.git_url, &repo.ssh_url]
        .into_iter()
        .flatten()
        .find(|url| !url.is_empty())
        .cloned()
        .ok_or_else(|| ProviderError::endpoints_not_found(repo.full_name.clone()))
}

/// Handle used to stop a running provider from another task.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    cancel: CancellationToken,
    ack: watch::Receiver<bool>,
    stop_timeout: Duration,
}

impl ProviderHandle {
    /// Requests the provider to stop and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderStop` error if the provider does not acknowledge
    /// within the stop timeout.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.cancel.cancel();

        let mut ack = self.ack.clone();
        let acked = tokio::time::timeout(self.stop_timeout, ack.wait_for(|stopped| *stopped))
            .await
            .is_ok();

        if acked {
            Ok(())
        } else {
            Err(ProviderError::stop_failed(self.stop_timeout))
        }
    }

    /// Returns whether stop was requested.
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Provider feeding download jobs from a repository source into a queue.
pub struct DiscoveryProvider<I> {
    iter: I,
    queue: Arc<JobQueue<LibraryJob>>,
    opts: ProviderOpts,
    retry_jobs: VecDeque<LibraryJob>,
    backoff: Backoff,
    metrics: Option<Arc<dyn MetricsCollector>>,
    cancel: CancellationToken,
    ack: watch::Sender<bool>,
}

impl<I: RepositoryIter> DiscoveryProvider<I> {
    /// Creates a provider reading `iter` and feeding `queue`.
    pub fn new(iter: I, queue: Arc<JobQueue<LibraryJob>>, opts: ProviderOpts) -> Self {
        let opts = opts.normalized(queue.capacity());
        let (ack, _) = watch::channel(false);

        Self {
            iter,
            queue,
            retry_jobs: VecDeque::with_capacity(opts.max_job_buffer),
            opts,
            backoff: Backoff::default(),
            metrics: None,
            cancel: CancellationToken::new(),
            ack,
        }
    }

    /// Reports every enqueued job to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replaces the backoff generator.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the effective options.
    pub fn opts(&self) -> &ProviderOpts {
        &self.opts
    }

    /// Returns a handle that can stop this provider.
    pub fn handle(&self) -> ProviderHandle {
        ProviderHandle {
            cancel: self.cancel.clone(),
            ack: self.ack.subscribe(),
            stop_timeout: self.opts.stop_timeout,
        }
    }

    /// Returns the number of jobs waiting in the retry buffer.
    pub fn pending_retries(&self) -> usize {
        self.retry_jobs.len()
    }

    /// Runs the provider until it is stopped or hits a terminal error.
    ///
    /// Always returns an error: `ProviderStopped` for a requested stop or a
    /// dry source the provider was told not to wait on, anything else for
    /// unrecoverable discovery failures. Stop acknowledgement is sent on
    /// every exit.
    pub async fn start(&mut self) -> Result<(), ProviderError> {
        let cancel = self.cancel.clone();
        info!(queue = %self.queue.name(), "Provider started");

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(ProviderError::stopped()),
                step = self.enqueue_job(&cancel) => {
                    if let Err(e) = step {
                        break Err(e);
                    }
                }
            }
        };

        self.ack.send_replace(true);
        match &result {
            Err(e) if e.is(ErrorKind::ProviderStopped) => {
                info!(pending_retries = self.retry_jobs.len(), "Provider stopped")
            }
            Err(e) => warn!(error = %e, "Provider terminated"),
            Ok(()) => {}
        }

        result
    }

    /// One provider step: enqueue a buffered or freshly discovered job.
    async fn enqueue_job(&mut self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let job = match self.retry_jobs.pop_front() {
            Some(job) => job,
            None => match self.iter.next(cancel).await {
                Ok(repo) => match resolve_endpoint(&repo) {
                    Ok(endpoint) => LibraryJob::download(vec![endpoint]),
                    Err(e) => {
                        debug!(error = %e, "Skipping repository");
                        return Ok(());
                    }
                },
                Err(e) => return self.handle_discovery_error(e).await,
            },
        };

        let discovered = self.metrics.as_ref().map(|_| job.clone());
        match self.queue.send_timeout(job, self.opts.enqueue_timeout).await {
            Ok(()) => {
                if let (Some(metrics), Some(job)) = (&self.metrics, discovered) {
                    metrics.discover(&job);
                }
                self.backoff.reset();
                Ok(())
            }
            Err(SendError::Timeout(job)) => {
                // The head of the buffer is popped before every send, so the
                // buffer holds at most one job and, with `max_job_buffer` >= 1
                // after normalization, nothing is dropped here in practice.
                if self.retry_jobs.len() < self.opts.max_job_buffer {
                    self.retry_jobs.push_back(job);
                } else {
                    warn!(
                        endpoint = job.endpoint().unwrap_or_default(),
                        "Retry buffer full, dropping job"
                    );
                }

                let delay = self.backoff.next();
                debug!(
                    pending_retries = self.retry_jobs.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Queue full, backing off"
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Err(SendError::Closed(_)) => Err(ProviderError::wrap(
                ErrorKind::ProviderStopped,
                QueueError::Closed(self.queue.name().to_string()),
            )),
        }
    }

    async fn handle_discovery_error(&mut self, err: DiscoveryError) -> Result<(), ProviderError> {
        let (kind, wait) = match err {
            DiscoveryError::EndOfSource { .. } => {
                (ErrorKind::NewRepositoriesNotFound, self.opts.wait_new_repos)
            }
            DiscoveryError::RateLimited { .. } => {
                (ErrorKind::RateLimitExceeded, self.opts.wait_on_rate_limit)
            }
            DiscoveryError::Http {
                retry_after: Some(delay),
                ..
            } if !delay.is_zero() => (ErrorKind::Discovery, true),
            _ => return Err(ProviderError::wrap(ErrorKind::Discovery, err)),
        };

        if !wait {
            return Err(ProviderError::stopped_by(ProviderError::wrap(kind, err)));
        }

        let delay = match err.retry_after() {
            Some(delay) if !delay.is_zero() => delay,
            _ => self.backoff.next(),
        };
        info!(
            reason = %kind,
            delay_secs = delay.as_secs(),
            "Waiting before polling source again"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
