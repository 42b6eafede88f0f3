//! Prometheus metrics for batch runs
//!
//! Metrics go through the `metrics` facade, so they are no-ops until a
//! recorder is installed with [`init_metrics`].

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Later calls, or a recorder installed by
/// someone else, leave the existing setup alone.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .inspect(|_| info!("Prometheus metrics initialized"))
            .inspect_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
    });
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format (empty if not initialized)
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Metrics for one batch job, labelled by job name
#[derive(Debug, Clone)]
pub struct BatchMetrics {
    job: String,
}

impl BatchMetrics {
    pub fn new(job: impl Into<String>) -> Self {
        Self { job: job.into() }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn unit_succeeded(&self, duration: Duration) {
        counter!(
            "batch_runner_units_total",
            "job" => self.job.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "batch_runner_unit_duration_seconds",
            "job" => self.job.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn unit_failed(&self) {
        counter!(
            "batch_runner_units_total",
            "job" => self.job.clone(),
            "status" => "failed"
        )
        .increment(1);
    }

    /// A single attempt of a unit returned an error or panicked
    pub fn attempt_failed(&self) {
        counter!(
            "batch_runner_attempt_failures_total",
            "job" => self.job.clone()
        )
        .increment(1);
    }

    pub fn resource_release_failed(&self) {
        counter!(
            "batch_runner_resource_release_failures_total",
            "job" => self.job.clone()
        )
        .increment(1);
    }

    pub fn active_workers(&self, count: usize) {
        gauge!(
            "batch_runner_active_workers",
            "job" => self.job.clone()
        )
        .set(count as f64);
    }
}
