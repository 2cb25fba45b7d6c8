//! Updates provider: one update job per repository already in the library.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ErrorKind, ProviderError};
use crate::library::{GitLibrary, LibraryJob};
use crate::scheduler::{JobQueue, MetricsCollector, SendError};

/// Enqueues an update job for every mirror in the library, then closes the
/// queue.
pub struct UpdatesProvider {
    library: Arc<GitLibrary>,
    queue: Arc<JobQueue<LibraryJob>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    cancel: CancellationToken,
}

impl UpdatesProvider {
    /// Creates a provider over `library` feeding `queue`.
    pub fn new(library: Arc<GitLibrary>, queue: Arc<JobQueue<LibraryJob>>) -> Self {
        Self {
            library,
            queue,
            metrics: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Reports every enqueued job to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns a token that stops the provider when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enqueues every repository and closes the queue.
    ///
    /// Returns how many jobs were enqueued. The queue is closed on every
    /// exit path so consumers always drain.
    pub async fn run(&self) -> Result<usize, ProviderError> {
        let result = self.enqueue_all().await;
        self.queue.close();
        result
    }

    async fn enqueue_all(&self) -> Result<usize, ProviderError> {
        let endpoints = self
            .library
            .repositories()
            .await
            .map_err(|e| ProviderError::wrap(ErrorKind::Discovery, e))?;
        info!(repositories = endpoints.len(), "Scheduling library updates");

        let mut enqueued = 0;
        for endpoint in endpoints {
            let job = LibraryJob::update(vec![endpoint]);
            let discovered = self.metrics.as_ref().map(|_| job.clone());

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProviderError::stopped()),
                sent = self.queue.send(job) => sent,
            };

            match sent {
                Ok(()) => {
                    enqueued += 1;
                    if let (Some(metrics), Some(job)) = (&self.metrics, discovered) {
                        metrics.discover(&job);
                    }
                }
                Err(SendError::Closed(job) | SendError::Timeout(job)) => {
                    debug!(endpoint = job.endpoint().unwrap_or_default(), "Update queue closed");
                    return Err(ProviderError::stopped());
                }
            }
        }

        Ok(enqueued)
    }
}
