//! Prometheus metrics registration and export.
//!
//! This module defines the Prometheus metrics used by gitcollector and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Global Prometheus registry for all gitcollector metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of jobs seen, labeled by kind and event
/// (discovered, succeeded, failed).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of jobs buffered in a queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Serializes initialization so the statics come from one registry.
static INIT: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT.lock().unwrap_or_else(PoisonError::into_inner);
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("gitcollector_jobs_total", "Total number of jobs by lifecycle event"),
        &["kind", "event"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("gitcollector_queue_depth", "Number of jobs in queue"),
        &["queue_name"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = QUEUE_DEPTH.set(queue_depth);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_repeatable() {
        init_metrics().expect("first init");
        init_metrics().expect("second init");
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        init_metrics().expect("init");
        JOBS_TOTAL
            .get()
            .expect("jobs counter")
            .with_label_values(&["download", "discovered"])
            .inc();

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("gitcollector_jobs_total"));
    }
}
