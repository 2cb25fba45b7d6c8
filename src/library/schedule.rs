//! Schedule functions over download and update queues.
//!
//! Downloads take priority over updates. To keep a steady stream of
//! downloads from starving updates forever, after a run of consecutive
//! downloads the update queue is asked first once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{select_all, FutureExt};
use tokio::time::Instant;
use tracing::trace;

use crate::scheduler::{JobQueue, ScheduleFn, Scheduled, TryRecv};

use super::job::{JobKind, LibraryJob, ProcessFn};

/// Default time a schedule attempt waits for a job before answering
/// `NotReady`.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// Default number of consecutive downloads after which a ready update is
/// served first.
pub const DEFAULT_DOWNLOAD_STREAK: usize = 32;

struct Lane {
    kind: JobKind,
    queue: Arc<JobQueue<LibraryJob>>,
    process: ProcessFn,
}

enum Attempt {
    Job(LibraryJob),
    Empty,
    Exhausted,
}

/// Schedule function that reads one or both library queues.
pub struct LibraryScheduleFn {
    /// Lanes in priority order.
    lanes: Vec<Lane>,
    wait: Duration,
    max_download_streak: Option<usize>,
    download_streak: AtomicUsize,
}

impl LibraryScheduleFn {
    fn with_lanes(lanes: Vec<Lane>) -> Self {
        Self {
            lanes,
            wait: DEFAULT_WAIT,
            max_download_streak: Some(DEFAULT_DOWNLOAD_STREAK),
            download_streak: AtomicUsize::new(0),
        }
    }

    /// Reads both queues, downloads first.
    pub fn combined(
        download: Arc<JobQueue<LibraryJob>>,
        update: Arc<JobQueue<LibraryJob>>,
        download_fn: ProcessFn,
        update_fn: ProcessFn,
    ) -> Self {
        Self::with_lanes(vec![
            Lane {
                kind: JobKind::Download,
                queue: download,
                process: download_fn,
            },
            Lane {
                kind: JobKind::Update,
                queue: update,
                process: update_fn,
            },
        ])
    }

    /// Reads the download queue only.
    pub fn download_only(download: Arc<JobQueue<LibraryJob>>, download_fn: ProcessFn) -> Self {
        Self::with_lanes(vec![Lane {
            kind: JobKind::Download,
            queue: download,
            process: download_fn,
        }])
    }

    /// Reads the update queue only.
    pub fn update_only(update: Arc<JobQueue<LibraryJob>>, update_fn: ProcessFn) -> Self {
        Self::with_lanes(vec![Lane {
            kind: JobKind::Update,
            queue: update,
            process: update_fn,
        }])
    }

    /// Sets how long one attempt waits for a job to arrive.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the download run length after which updates go first once.
    /// `None` gives downloads strict priority.
    pub fn with_max_download_streak(mut self, streak: Option<usize>) -> Self {
        self.max_download_streak = streak;
        self
    }

    fn lane_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.lanes.len()).collect();
        if let Some(max) = self.max_download_streak {
            if self.download_streak.load(Ordering::SeqCst) >= max {
                order.reverse();
            }
        }
        order
    }

    fn try_dispatch(&self) -> Attempt {
        let mut exhausted = 0;

        for index in self.lane_order() {
            let lane = &self.lanes[index];
            match lane.queue.try_recv() {
                TryRecv::Received(job) => {
                    match lane.kind {
                        JobKind::Download => self.download_streak.fetch_add(1, Ordering::SeqCst),
                        JobKind::Update => self.download_streak.swap(0, Ordering::SeqCst),
                    };
                    return Attempt::Job(job.with_process_fn(Arc::clone(&lane.process)));
                }
                TryRecv::Empty => {}
                TryRecv::Closed => exhausted += 1,
            }
        }

        if exhausted == self.lanes.len() {
            Attempt::Exhausted
        } else {
            Attempt::Empty
        }
    }
}

#[async_trait]
impl ScheduleFn for LibraryScheduleFn {
    async fn schedule(&self) -> Scheduled {
        let deadline = Instant::now() + self.wait;

        loop {
            match self.try_dispatch() {
                Attempt::Job(job) => return Scheduled::Job(Box::new(job)),
                Attempt::Exhausted => return Scheduled::Exhausted,
                Attempt::Empty => {}
            }

            let pending: Vec<_> = self
                .lanes
                .iter()
                .filter(|lane| !lane.queue.is_exhausted())
                .map(|lane| lane.queue.ready().boxed())
                .collect();
            if pending.is_empty() {
                continue;
            }

            if tokio::time::timeout_at(deadline, select_all(pending))
                .await
                .is_err()
            {
                trace!("no library job ready");
                return Scheduled::NotReady;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::job::process_fn;
    use crate::scheduler::Job;

    fn noop() -> ProcessFn {
        process_fn(|_, _| async { Ok(()) })
    }

    fn queues(cap: usize) -> (Arc<JobQueue<LibraryJob>>, Arc<JobQueue<LibraryJob>>) {
        (
            Arc::new(JobQueue::new("download", cap)),
            Arc::new(JobQueue::new("update", cap)),
        )
    }

    async fn next_kind(schedule: &LibraryScheduleFn) -> Option<String> {
        match schedule.schedule().await {
            Scheduled::Job(job) => Some(job.kind().to_string()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_downloads_before_updates() {
        let (download, update) = queues(4);
        update.send(LibraryJob::update(vec!["u".into()])).await.expect("send");
        download.send(LibraryJob::download(vec!["d".into()])).await.expect("send");

        let schedule = LibraryScheduleFn::combined(download, update, noop(), noop());
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("download"));
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("update"));
    }

    #[tokio::test]
    async fn test_not_ready_after_wait() {
        let (download, update) = queues(1);
        let schedule = LibraryScheduleFn::combined(download, update, noop(), noop())
            .with_wait(Duration::from_millis(20));

        assert!(matches!(schedule.schedule().await, Scheduled::NotReady));
    }

    #[tokio::test]
    async fn test_exhausted_when_all_closed() {
        let (download, update) = queues(2);
        update.send(LibraryJob::update(vec!["u".into()])).await.expect("send");
        download.close();
        update.close();

        let schedule = LibraryScheduleFn::combined(download, update, noop(), noop());
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("update"));
        assert!(matches!(schedule.schedule().await, Scheduled::Exhausted));
    }

    #[tokio::test]
    async fn test_single_queue_variants() {
        let (download, update) = queues(2);
        download.send(LibraryJob::download(vec!["d".into()])).await.expect("send");
        update.send(LibraryJob::update(vec!["u".into()])).await.expect("send");

        let downloads = LibraryScheduleFn::download_only(Arc::clone(&download), noop());
        let updates = LibraryScheduleFn::update_only(Arc::clone(&update), noop());

        assert_eq!(next_kind(&downloads).await.as_deref(), Some("download"));
        assert_eq!(next_kind(&updates).await.as_deref(), Some("update"));

        download.close();
        assert!(matches!(downloads.schedule().await, Scheduled::Exhausted));
    }

    #[tokio::test]
    async fn test_download_streak_yields_to_update() {
        let (download, update) = queues(8);
        for _ in 0..4 {
            download.send(LibraryJob::download(vec!["d".into()])).await.expect("send");
        }
        update.send(LibraryJob::update(vec!["u".into()])).await.expect("send");

        let schedule = LibraryScheduleFn::combined(download, update, noop(), noop())
            .with_max_download_streak(Some(2));

        assert_eq!(next_kind(&schedule).await.as_deref(), Some("download"));
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("download"));
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("update"));
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("download"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wakes_when_job_arrives() {
        let (download, update) = queues(1);
        let schedule =
            LibraryScheduleFn::combined(Arc::clone(&download), update, noop(), noop())
                .with_wait(Duration::from_secs(5));

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            download
                .send(LibraryJob::download(vec!["late".into()]))
                .await
                .expect("send");
        });

        let started = std::time::Instant::now();
        assert_eq!(next_kind(&schedule).await.as_deref(), Some("download"));
        assert!(started.elapsed() < Duration::from_secs(2));
        producer.await.expect("producer");
    }

    #[tokio::test]
    async fn test_dropped_attempt_keeps_queued_jobs() {
        let (download, update) = queues(2);
        let schedule =
            LibraryScheduleFn::combined(Arc::clone(&download), update, noop(), noop())
                .with_wait(Duration::from_secs(5));

        // Abandon an attempt parked on empty queues, as a resized or
        // stopped worker does.
        let abandoned = tokio::time::timeout(Duration::from_millis(20), schedule.schedule()).await;
        assert!(abandoned.is_err());

        download
            .send(LibraryJob::download(vec!["kept".into()]))
            .await
            .expect("send");
        assert_eq!(download.len(), 1);

        match schedule.schedule().await {
            Scheduled::Job(job) => assert_eq!(job.kind(), "download"),
            _ => panic!("queued job was lost"),
        }
        assert!(download.is_empty());
    }
}
