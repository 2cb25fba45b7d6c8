//! Job scheduling with bounded queues and a resizable worker pool.
//!
//! This module provides the in-process execution engine:
//!
//! - **JobQueue**: bounded FIFO queue with timed sends and producer-side close
//! - **JobScheduler**: hands jobs to workers using a pluggable schedule function
//! - **WorkerPool**: pool of workers that process jobs concurrently
//! - **Backoff**: exponential backoff with jitter, shared by the scheduler and providers
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────┐       ┌──────────┐
//!    │ Provider │       │ Provider │
//!    └────┬─────┘       └────┬─────┘
//!         │                  │
//!   ┌─────▼─────┐      ┌─────▼─────┐
//!   │ JobQueue  │      │ JobQueue  │
//!   │ (download)│      │ (update)  │
//!   └─────┬─────┘      └─────┬─────┘
//!         └────────┬─────────┘
//!           ┌──────▼───────┐
//!           │ ScheduleFn   │
//!           │ JobScheduler │
//!           └──────┬───────┘
//!      ┌───────────┼───────────┐
//!      ▼           ▼           ▼
//! ┌─────────┐ ┌─────────┐ ┌─────────┐
//! │ Worker 1│ │ Worker 2│ │ Worker N│
//! └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gitcollector::library::{LibraryScheduleFn, LibraryJob};
//! use gitcollector::scheduler::{
//!     JobQueue, JobScheduler, JobSchedulerOpts, NoopMetrics, WorkerPool, WorkerPoolConfig,
//! };
//!
//! let downloads = Arc::new(JobQueue::new("download", 50));
//! let schedule = LibraryScheduleFn::download_only(Arc::clone(&downloads), process);
//! let scheduler = JobScheduler::new(schedule, JobSchedulerOpts::default());
//!
//! let pool = WorkerPool::new(scheduler, Arc::new(NoopMetrics), WorkerPoolConfig::new(8));
//! pool.run()?;
//!
//! downloads.send(LibraryJob::download(vec![endpoint])).await?;
//! downloads.close();
//! pool.wait().await;
//! ```

pub mod backoff;
pub mod job;
pub mod queue;
pub mod schedule;
pub mod worker_pool;

// Re-export main types for convenience
pub use backoff::Backoff;
pub use job::{Job, JobStatus, MetricsCollector, NoopMetrics};
pub use queue::{JobQueue, QueueError, SendError, TryRecv};
pub use schedule::{JobScheduler, JobSchedulerOpts, ScheduleFn, Scheduled};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
