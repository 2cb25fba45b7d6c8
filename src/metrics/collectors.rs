//! Job metrics collector.
//!
//! `JobMetrics` implements the scheduler's [`MetricsCollector`] by keeping
//! in-process counters per job kind, mirroring them into the Prometheus
//! registry when it is initialized, and logging a periodic progress summary
//! while started.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::scheduler::{Job, JobQueue, MetricsCollector};

use super::prometheus::{JOBS_TOTAL, QUEUE_DEPTH};

/// Default interval between progress summaries.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Counters for one job kind.
#[derive(Debug, Default)]
struct KindCounters {
    discovered: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the counters for one job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSnapshot {
    pub discovered: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Point-in-time view of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Counters keyed by job kind.
    pub by_kind: BTreeMap<String, KindSnapshot>,
}

impl MetricsSnapshot {
    /// Returns the counters for `kind`, zero if never seen.
    pub fn kind(&self, kind: &str) -> KindSnapshot {
        self.by_kind.get(kind).copied().unwrap_or_default()
    }

    /// Sums all kinds.
    pub fn total(&self) -> KindSnapshot {
        self.by_kind
            .values()
            .fold(KindSnapshot::default(), |acc, k| KindSnapshot {
                discovered: acc.discovered + k.discovered,
                succeeded: acc.succeeded + k.succeeded,
                failed: acc.failed + k.failed,
            })
    }
}

type DepthProbe = Arc<dyn Fn() -> usize + Send + Sync>;

struct Inner {
    kinds: Mutex<BTreeMap<String, Arc<KindCounters>>>,
    queues: Mutex<Vec<(String, DepthProbe)>>,
}

impl Inner {
    fn counters(&self, kind: &str) -> Arc<KindCounters> {
        let mut kinds = self.kinds.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(kinds.entry(kind.to_string()).or_default())
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let kinds = self.kinds.lock().unwrap_or_else(PoisonError::into_inner);
        let by_kind = kinds
            .iter()
            .map(|(kind, c)| {
                (
                    kind.clone(),
                    KindSnapshot {
                        discovered: c.discovered.load(Ordering::SeqCst),
                        succeeded: c.succeeded.load(Ordering::SeqCst),
                        failed: c.failed.load(Ordering::SeqCst),
                    },
                )
            })
            .collect();
        MetricsSnapshot { by_kind }
    }

    fn sample_queues(&self) -> Vec<(String, usize)> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .iter()
            .map(|(name, probe)| {
                let depth = probe();
                if let Some(gauge) = QUEUE_DEPTH.get() {
                    gauge.with_label_values(&[name.as_str()]).set(depth as f64);
                }
                (name.clone(), depth)
            })
            .collect()
    }

    fn report(&self, message: &str) {
        let total = self.snapshot().total();
        let queues = self.sample_queues();
        info!(
            discovered = total.discovered,
            succeeded = total.succeeded,
            failed = total.failed,
            queues = ?queues,
            "{}",
            message
        );
    }
}

/// Metrics collector for library jobs.
///
/// Cheap to clone; clones share counters.
#[derive(Clone)]
pub struct JobMetrics {
    inner: Arc<Inner>,
    interval: Duration,
    reporter: Arc<Mutex<Option<(CancellationToken, JoinHandle<()>)>>>,
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl JobMetrics {
    /// Create a collector reporting every [`DEFAULT_REPORT_INTERVAL`].
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_REPORT_INTERVAL)
    }

    /// Create a collector reporting at the given interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                kinds: Mutex::new(BTreeMap::new()),
                queues: Mutex::new(Vec::new()),
            }),
            interval,
            reporter: Arc::new(Mutex::new(None)),
        }
    }

    /// Includes `queue` depth in reports and the queue depth gauge.
    pub fn track_queue<J: Send + 'static>(&self, queue: Arc<JobQueue<J>>) {
        let name = queue.name().to_string();
        let probe: DepthProbe = Arc::new(move || queue.len());
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, probe));
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.snapshot()
    }

    fn record(&self, job: &dyn Job, event: &str) {
        let counters = self.inner.counters(job.kind());
        let counter = match event {
            "discovered" => &counters.discovered,
            "succeeded" => &counters.succeeded,
            _ => &counters.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[job.kind(), event]).inc();
        }

        trace!(kind = job.kind(), event = event, "Recorded job metric");
    }
}

impl MetricsCollector for JobMetrics {
    fn start(&self) {
        let mut reporter = self.reporter.lock().unwrap_or_else(PoisonError::into_inner);
        if reporter.is_some() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, periodic metrics reports disabled");
            return;
        };

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;
        let token = cancel.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.report("Collection progress"),
                }
            }
        });

        *reporter = Some((cancel, handle));
    }

    fn stop(&self, immediate: bool) {
        let reporter = self
            .reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some((cancel, _handle)) = reporter {
            cancel.cancel();
        }

        if !immediate {
            self.inner.report("Collection finished");
        }
    }

    fn success(&self, job: &dyn Job) {
        self.record(job, "succeeded");
    }

    fn fail(&self, job: &dyn Job) {
        self.record(job, "failed");
    }

    fn discover(&self, job: &dyn Job) {
        self.record(job, "discovered");
    }
}

impl std::fmt::Debug for JobMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMetrics")
            .field("snapshot", &self.snapshot())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryJob;
    use crate::metrics::init_metrics;

    #[test]
    fn test_counts_by_kind() {
        let metrics = JobMetrics::new();
        let download = LibraryJob::download(vec!["https://github.com/a/b".into()]);
        let update = LibraryJob::update(vec!["https://github.com/a/b".into()]);

        metrics.discover(&download);
        metrics.discover(&download);
        metrics.success(&download);
        metrics.fail(&update);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.kind("download"),
            KindSnapshot {
                discovered: 2,
                succeeded: 1,
                failed: 0
            }
        );
        assert_eq!(snapshot.kind("update").failed, 1);
        assert_eq!(snapshot.kind("unknown"), KindSnapshot::default());
        assert_eq!(snapshot.total().discovered, 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = JobMetrics::new();
        let clone = metrics.clone();
        clone.success(&LibraryJob::download(vec!["x".into()]));
        assert_eq!(metrics.snapshot().total().succeeded, 1);
    }

    #[tokio::test]
    async fn test_start_stop_with_queue_tracking() {
        init_metrics().expect("init");
        let metrics = JobMetrics::with_interval(Duration::from_millis(10));
        let queue: Arc<JobQueue<LibraryJob>> = Arc::new(JobQueue::new("tracked", 2));
        queue
            .send(LibraryJob::download(vec!["x".into()]))
            .await
            .expect("send");
        metrics.track_queue(Arc::clone(&queue));

        metrics.start();
        metrics.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        metrics.stop(false);
        metrics.stop(true);

        let gauge = QUEUE_DEPTH.get().expect("gauge");
        assert_eq!(gauge.with_label_values(&["tracked"]).get(), 1.0);
    }

    #[test]
    fn test_start_without_runtime_is_harmless() {
        let metrics = JobMetrics::new();
        metrics.start();
        metrics.stop(true);
    }
}
