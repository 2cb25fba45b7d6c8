//! Metrics collection and Prometheus export.
//!
//! # Example
//!
//! ```ignore
//! use gitcollector::metrics::{export_metrics, init_metrics, JobMetrics};
//! use gitcollector::scheduler::MetricsCollector;
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let metrics = JobMetrics::new();
//! metrics.track_queue(download_queue.clone());
//! metrics.start();
//! // ... hand `metrics` to the worker pool and providers ...
//! metrics.stop(false);
//!
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{JobMetrics, KindSnapshot, MetricsSnapshot};
pub use prometheus::{export_metrics, init_metrics, JOBS_TOTAL, QUEUE_DEPTH, REGISTRY};
