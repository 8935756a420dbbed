//! Periodic backup scheduling.
//!
//! The scheduler runs one cycle (cleanup, then backup) at startup and then
//! one cycle per tick of a fixed-period timer. It moves through two phases:
//!
//! - [`Phase::Bootstrapping`]: the startup cycle. A failed backup is fatal
//!   and [`Scheduler::run`] returns the error. A failed cleanup is logged.
//! - [`Phase::SteadyState`]: every failure is logged and the next tick is
//!   the retry.
//!
//! Cycles never overlap. A cycle that overruns the interval is followed
//! immediately by one late cycle; the remaining missed ticks are skipped.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::archive::ArchiveBuilder;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::name::ObjectName;
use crate::retention::{CleanupReport, RetentionManager};

/// The two halves of a cycle.
#[async_trait]
pub trait BackupJob: Send + Sync {
    /// Removes expired backups.
    async fn clean(&self) -> Result<CleanupReport>;

    /// Takes and uploads one backup.
    async fn backup(&self) -> Result<ObjectName>;
}

/// Production job: retention cleanup plus archive upload.
pub struct Backup {
    retention: RetentionManager,
    archive: ArchiveBuilder,
}

impl Backup {
    pub fn new(retention: RetentionManager, archive: ArchiveBuilder) -> Self {
        Self { retention, archive }
    }
}

#[async_trait]
impl BackupJob for Backup {
    async fn clean(&self) -> Result<CleanupReport> {
        self.retention.clean().await
    }

    async fn backup(&self) -> Result<ObjectName> {
        self.archive.take().await
    }
}

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    SteadyState,
}

/// Bookkeeping about past cycles. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    /// Completion time of the last successful backup.
    pub last_success: Option<DateTime<Utc>>,
    /// Outcome of the most recent backup attempt.
    pub last_backup_succeeded: Option<bool>,
    /// Cycles started, including the startup cycle.
    pub cycles: u64,
}

/// Drives [`BackupJob`] cycles on a fixed interval.
pub struct Scheduler<J> {
    job: J,
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
    phase: Phase,
    state: CycleState,
}

impl<J: BackupJob> Scheduler<J> {
    /// Creates a scheduler. `interval` must be non-zero.
    pub fn new(job: J, metrics: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        Self {
            job,
            metrics,
            interval,
            phase: Phase::Bootstrapping,
            state: CycleState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    /// Runs the startup cycle, then cycles forever.
    ///
    /// # Errors
    ///
    /// Returns only when the startup backup fails.
    pub async fn run(&mut self) -> Result<Infallible> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately.
        ticker.tick().await;
        self.bootstrap().await?;

        info!(interval = ?self.interval, "entering steady state");
        loop {
            ticker.tick().await;
            self.cycle().await;
        }
    }

    /// Runs the startup cycle and, on success, moves to the steady state.
    ///
    /// # Errors
    ///
    /// Returns the backup error if the startup backup fails.
    pub async fn bootstrap(&mut self) -> Result<()> {
        debug_assert_eq!(self.phase, Phase::Bootstrapping);
        self.state.cycles += 1;

        if self.clean().await.is_err() {
            warn!("startup cleanup failed, continuing with backup");
        }

        self.backup().await?;
        self.phase = Phase::SteadyState;
        Ok(())
    }

    /// Runs one steady-state cycle. Returns whether the backup succeeded.
    pub async fn cycle(&mut self) -> bool {
        self.state.cycles += 1;
        // Cleanup failures never block the backup.
        let _ = self.clean().await;
        self.backup().await.is_ok()
    }

    async fn clean(&self) -> Result<CleanupReport> {
        info!("cleaning old backups");
        match self.job.clean().await {
            Ok(report) => {
                info!(
                    examined = report.examined,
                    deleted = report.deleted.len(),
                    "done cleaning old backups"
                );
                Ok(report)
            },
            Err(err) => {
                error!(error = %error_chain(&err), "error cleaning backups");
                Err(err)
            },
        }
    }

    async fn backup(&mut self) -> Result<ObjectName> {
        info!("taking backup");
        match self.job.backup().await {
            Ok(name) => {
                let now = Utc::now();
                self.metrics.backup_succeeded(now);
                self.state.last_success = Some(now);
                self.state.last_backup_succeeded = Some(true);
                info!(object = %name, "backup done");
                Ok(name)
            },
            Err(err) => {
                self.metrics.backup_failed();
                self.state.last_backup_succeeded = Some(false);
                error!(
                    error = %error_chain(&err),
                    data_integrity = err.is_data_integrity(),
                    "error taking backup"
                );
                Err(err)
            },
        }
    }
}

/// Renders an error and all of its sources as `outer: inner: root`.
pub fn error_chain(err: &Error) -> String {
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
