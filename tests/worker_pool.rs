//! End-to-end tests for the worker pool driving library queues.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gitcollector::library::{process_fn, LibraryJob, LibraryScheduleFn, ProcessFn};
use gitcollector::metrics::JobMetrics;
use gitcollector::scheduler::{
    JobQueue, JobScheduler, JobSchedulerOpts, NoopMetrics, WorkerPool, WorkerPoolConfig,
};
use gitcollector::JobError;

type Log = Arc<Mutex<Vec<String>>>;

fn recording(prefix: &'static str, log: &Log) -> ProcessFn {
    let log = Arc::clone(log);
    process_fn(move |_cancel, job: LibraryJob| {
        let log = Arc::clone(&log);
        async move {
            let endpoint = job.endpoint().unwrap_or_default().to_string();
            log.lock()
                .expect("log lock")
                .push(format!("{prefix}:{endpoint}"));
            Ok(())
        }
    })
}

fn queue(name: &str, capacity: usize) -> Arc<JobQueue<LibraryJob>> {
    Arc::new(JobQueue::new(name, capacity))
}

fn names() -> Vec<String> {
    ('a'..='j').map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_pool_drains_both_queues() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let downloads = queue("download", 2);
    let updates = queue("update", 20);

    let schedule = LibraryScheduleFn::combined(
        Arc::clone(&downloads),
        Arc::clone(&updates),
        recording("download", &log),
        recording("update", &log),
    );
    let pool = WorkerPool::new(
        JobScheduler::new(
            schedule,
            JobSchedulerOpts::new().with_not_wait_new_jobs(true),
        ),
        Arc::new(NoopMetrics),
        WorkerPoolConfig::new(10),
    );
    pool.run().expect("pool starts");

    for name in names() {
        downloads
            .send(LibraryJob::download(vec![name.clone()]))
            .await
            .expect("download enqueued");
        updates
            .send(LibraryJob::update(vec![name]))
            .await
            .expect("update enqueued");
    }
    downloads.close();
    updates.close();

    tokio::time::timeout(Duration::from_secs(10), pool.wait())
        .await
        .expect("pool finishes");

    let mut processed = log.lock().expect("log lock").clone();
    processed.sort();
    let mut expected: Vec<String> = names()
        .into_iter()
        .flat_map(|n| [format!("download:{n}"), format!("update:{n}")])
        .collect();
    expected.sort();
    assert_eq!(processed, expected);

    let stats = pool.stats();
    assert_eq!(stats.jobs_completed, 20);
    assert_eq!(stats.jobs_failed, 0);
    assert_eq!(stats.live_workers, 0);

    // A second wait returns at once.
    tokio::time::timeout(Duration::from_millis(100), pool.wait())
        .await
        .expect("wait is idempotent");
}

#[tokio::test]
async fn test_every_job_runs_once_for_any_worker_count() {
    for workers in [1, 3, 7, 12] {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let downloads = queue("download", 12);
        let updates = queue("update", 12);
        for n in 0..6 {
            downloads
                .send(LibraryJob::download(vec![format!("d{n}")]))
                .await
                .expect("download enqueued");
            updates
                .send(LibraryJob::update(vec![format!("u{n}")]))
                .await
                .expect("update enqueued");
        }
        downloads.close();
        updates.close();

        let schedule = LibraryScheduleFn::combined(
            downloads,
            updates,
            recording("download", &log),
            recording("update", &log),
        );
        let pool = WorkerPool::new(
            JobScheduler::new(
                schedule,
                JobSchedulerOpts::new().with_not_wait_new_jobs(true),
            ),
            Arc::new(NoopMetrics),
            WorkerPoolConfig::new(workers),
        );
        pool.run().expect("pool starts");
        tokio::time::timeout(Duration::from_secs(10), pool.wait())
            .await
            .expect("pool finishes");

        let processed = log.lock().expect("log lock").len();
        assert_eq!(processed, 12, "workers = {workers}");
    }
}

#[tokio::test]
async fn test_single_worker_serves_downloads_first_in_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let downloads = queue("download", 10);
    let updates = queue("update", 10);

    for name in ["a", "b", "c"] {
        updates
            .send(LibraryJob::update(vec![name.to_string()]))
            .await
            .expect("update enqueued");
    }
    for name in ["x", "y", "z"] {
        downloads
            .send(LibraryJob::download(vec![name.to_string()]))
            .await
            .expect("download enqueued");
    }
    downloads.close();
    updates.close();

    let schedule = LibraryScheduleFn::combined(
        downloads,
        updates,
        recording("download", &log),
        recording("update", &log),
    )
    .with_max_download_streak(None);
    let pool = WorkerPool::new(
        JobScheduler::new(schedule, JobSchedulerOpts::new()),
        Arc::new(NoopMetrics),
        WorkerPoolConfig::new(1),
    );
    pool.run().expect("pool starts");
    pool.wait().await;

    let processed = log.lock().expect("log lock").clone();
    assert_eq!(
        processed,
        vec![
            "download:x",
            "download:y",
            "download:z",
            "update:a",
            "update:b",
            "update:c",
        ]
    );
}

#[tokio::test]
async fn test_failures_and_timeouts_reach_metrics() {
    let updates = queue("update", 10);
    for name in ["ok", "broken", "slow"] {
        updates
            .send(LibraryJob::update(vec![name.to_string()]))
            .await
            .expect("update enqueued");
    }
    updates.close();

    let process = process_fn(|cancel, job: LibraryJob| async move {
        match job.endpoint() {
            Some("broken") => Err(JobError::Failed("remote hung up".into())),
            Some("slow") => {
                cancel.cancelled().await;
                Err(JobError::Cancelled)
            }
            _ => Ok(()),
        }
    });

    let metrics = Arc::new(JobMetrics::new());
    let pool = WorkerPool::new(
        JobScheduler::new(
            LibraryScheduleFn::update_only(updates, process),
            JobSchedulerOpts::new(),
        ),
        metrics.clone(),
        WorkerPoolConfig::new(3).with_job_timeout(Duration::from_millis(50)),
    );
    pool.run().expect("pool starts");
    tokio::time::timeout(Duration::from_secs(5), pool.wait())
        .await
        .expect("pool finishes");

    let stats = pool.stats();
    assert_eq!(stats.jobs_completed, 1);
    assert_eq!(stats.jobs_failed, 2);

    let update = metrics.snapshot().kind("update");
    assert_eq!(update.succeeded, 1);
    assert_eq!(update.failed, 2);
}

#[tokio::test]
async fn test_immediate_stop_cancels_running_jobs() {
    let downloads = queue("download", 4);
    for name in ["a", "b"] {
        downloads
            .send(LibraryJob::download(vec![name.to_string()]))
            .await
            .expect("download enqueued");
    }

    let process = process_fn(|cancel, _job: LibraryJob| async move {
        cancel.cancelled().await;
        Err(JobError::Cancelled)
    });
    let pool = WorkerPool::new(
        JobScheduler::new(
            LibraryScheduleFn::download_only(Arc::clone(&downloads), process),
            JobSchedulerOpts::new(),
        ),
        Arc::new(NoopMetrics),
        WorkerPoolConfig::new(2),
    );
    pool.run().expect("pool starts");

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.stop(true);
    tokio::time::timeout(Duration::from_secs(5), pool.wait())
        .await
        .expect("workers exit after stop");

    assert_eq!(pool.stats().jobs_failed, 2);
    assert!(!downloads.is_closed());
}
