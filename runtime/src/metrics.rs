//! Prometheus metrics for the reservation core.
//!
//! Metric names used by the pool, the saga executor and the coordinator:
//! - Reservation outcomes (`booking_reservations_total{outcome}`)
//! - Compensations (`booking_compensations_total{step,outcome}`)
//! - Pool occupancy, wait time and timeouts (`booking_pool_*`)
//!
//! Recording goes through the `metrics` facade and is a no-op until a recorder
//! is installed.
//!
//! # Example
//!
//! ```rust,no_run
//! use charterbook_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Reservation attempts by outcome label.
pub const RESERVATIONS_TOTAL: &str = "booking_reservations_total";
/// Compensating actions by step and outcome.
pub const COMPENSATIONS_TOTAL: &str = "booking_compensations_total";
/// Handles currently held.
pub const POOL_ACTIVE: &str = "booking_pool_active";
/// Callers queued for a handle.
pub const POOL_WAITING: &str = "booking_pool_waiting";
/// Time from `acquire()` to grant.
pub const POOL_ACQUIRE_DURATION: &str = "booking_pool_acquire_duration_seconds";
/// Acquires that gave up.
pub const POOL_TIMEOUTS_TOTAL: &str = "booking_pool_timeouts_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for reservation metrics.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by an earlier test), this logs a
    /// warning and returns `Ok` without a render handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        RESERVATIONS_TOTAL,
        "Reservation attempts by outcome (reserved, conflict, not_available, ...)"
    );
    describe_counter!(
        COMPENSATIONS_TOTAL,
        "Compensating actions run during rollback, by step and outcome"
    );
    describe_gauge!(POOL_ACTIVE, "Store handles currently held");
    describe_gauge!(POOL_WAITING, "Callers queued for a store handle");
    describe_histogram!(
        POOL_ACQUIRE_DURATION,
        "Time from acquire() to handle grant"
    );
    describe_counter!(
        POOL_TIMEOUTS_TOTAL,
        "Acquire calls that timed out waiting for a handle"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn exporter_starts_without_handle() {
        assert!(MetricsExporter::new().render().is_none());
    }

    #[test]
    fn install_tolerates_existing_recorder() {
        let mut first = MetricsExporter::new();
        first.install().unwrap();
        let mut second = MetricsExporter::new();
        assert!(second.install().is_ok());
    }

    #[test]
    fn rendered_output_contains_recorded_metrics() {
        let mut exporter = MetricsExporter::new();
        exporter.install().unwrap();

        counter!(RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);

        // Another test may have installed the recorder first.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains(RESERVATIONS_TOTAL));
        }
    }
}
