//! Backup metrics.
//!
//! The scheduler reports every backup attempt to a [`MetricsSink`]. The
//! production sink feeds two Prometheus gauges:
//!
//! - `kubeadm_backup_success` - 1 after a successful backup, 0 after a failure
//! - `kubeadm_backup_last_successful_backup_time` - Unix time of the last success

use std::net::SocketAddr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{Gauge, Unit, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;

/// Gauge set to 1 on success and 0 on failure.
pub const BACKUP_SUCCESS: &str = "kubeadm_backup_success";

/// Gauge holding the Unix time of the last successful backup.
pub const LAST_SUCCESSFUL_BACKUP_TIME: &str = "kubeadm_backup_last_successful_backup_time";

/// Receiver of backup outcomes.
pub trait MetricsSink: Send + Sync {
    /// A backup finished and was uploaded at `at`.
    fn backup_succeeded(&self, at: DateTime<Utc>);

    /// A backup attempt failed.
    fn backup_failed(&self);
}

/// Starts the Prometheus HTTP listener and installs the global recorder.
///
/// Must run inside a tokio runtime, before [`PrometheusSink::register`].
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot bind.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start metrics server on {addr}"))
}

/// Sink writing to the process-wide `metrics` recorder.
pub struct PrometheusSink {
    success: Gauge,
    last_success: Gauge,
}

impl PrometheusSink {
    /// Describes the gauges and binds handles to them.
    pub fn register() -> Self {
        describe_gauge!(BACKUP_SUCCESS, "kubeadm backup success");
        describe_gauge!(
            LAST_SUCCESSFUL_BACKUP_TIME,
            Unit::Seconds,
            "When the last backup was successfully run. Expressed as a Unix Epoch Time."
        );

        Self {
            success: gauge!(BACKUP_SUCCESS),
            last_success: gauge!(LAST_SUCCESSFUL_BACKUP_TIME),
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn backup_succeeded(&self, at: DateTime<Utc>) {
        self.success.set(1.0);
        self.last_success.set(at.timestamp() as f64);
    }

    fn backup_failed(&self) {
        self.success.set(0.0);
    }
}

/// Values last reported to a [`RecordingSink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedMetrics {
    /// Value of the success gauge; `None` before the first attempt.
    pub success: Option<f64>,
    /// Value of the last-success gauge.
    pub last_success: Option<DateTime<Utc>>,
    pub attempts: u64,
}

/// Sink that keeps reported values in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<RecordedMetrics>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RecordedMetrics {
        self.recorded.lock().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn backup_succeeded(&self, at: DateTime<Utc>) {
        let mut recorded = self.recorded.lock();
        recorded.success = Some(1.0);
        recorded.last_success = Some(at);
        recorded.attempts += 1;
    }

    fn backup_failed(&self) {
        let mut recorded = self.recorded.lock();
        recorded.success = Some(0.0);
        recorded.attempts += 1;
    }
}
