//! Cleanup of expired backups.
//!
//! Creation time is recovered from each object's name; an object is removed
//! once `now > created + ttl`. The pass is strict: a listing error, an object
//! whose name does not carry a timestamp, or a failed delete ends the pass.
//! Deletions made before the failure are kept.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, SecondsFormat, TimeDelta, Utc};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::name::backup_time;
use crate::store::ObjectStore;

/// Deadlines for one cleanup pass.
#[derive(Debug, Clone)]
pub struct RetentionTimeouts {
    /// The whole listing, from request to last name.
    pub list: Duration,
    /// Each individual delete.
    pub delete: Duration,
}

impl Default for RetentionTimeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(120),
            delete: Duration::from_secs(120),
        }
    }
}

/// Outcome of a successful cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Objects seen in the listing.
    pub examined: usize,
    /// Objects deleted, in deletion order.
    pub deleted: Vec<String>,
}

/// Returns true when a backup created at `created` has outlived `ttl`.
///
/// The boundary itself is not expired. A ttl too large to represent never
/// expires anything.
pub fn is_expired(created: DateTime<FixedOffset>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let Ok(ttl) = TimeDelta::from_std(ttl) else {
        return false;
    };
    match created.checked_add_signed(ttl) {
        Some(expires_at) => now > expires_at,
        None => false,
    }
}

/// Deletes backups older than the retention ttl.
pub struct RetentionManager {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
    timeouts: RetentionTimeouts,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn ObjectStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            timeouts: RetentionTimeouts::default(),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: RetentionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Runs one cleanup pass against the current time.
    ///
    /// # Errors
    ///
    /// See [`RetentionManager::clean_at`].
    pub async fn clean(&self) -> Result<CleanupReport> {
        self.clean_at(Utc::now()).await
    }

    /// Runs one cleanup pass, judging expiry against `now`.
    ///
    /// # Errors
    ///
    /// Returns an error on the first listing error, unparsable object
    /// name, failed delete, or when the listing deadline passes.
    pub async fn clean_at(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let deadline = Instant::now() + self.timeouts.list;
        let mut names = self.store.list(deadline);
        let mut report = CleanupReport::default();

        loop {
            let entry = match timeout_at(deadline, names.recv()).await {
                Ok(Some(entry)) => entry,
                Ok(None) if Instant::now() >= deadline => {
                    // The producer gave up; the listing is incomplete.
                    return Err(Error::timeout("listing backups", self.timeouts.list));
                },
                Ok(None) => break,
                Err(_) => return Err(Error::timeout("listing backups", self.timeouts.list)),
            };

            let name = entry.map_err(Error::List)?;
            report.examined += 1;

            let created = backup_time(&name).map_err(|source| Error::InvalidObjectName {
                name: name.clone(),
                source,
            })?;

            if !is_expired(created, self.ttl, now) {
                debug!(object = %name, "backup within retention");
                continue;
            }

            let backup_time = created.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            info!(backup_time = %backup_time, "Deleting old backup");

            timeout(self.timeouts.delete, self.store.delete(&name))
                .await
                .map_err(|_| Error::timeout("deleting backup", self.timeouts.delete))?
                .map_err(|source| Error::Delete {
                    backup_time: backup_time.clone(),
                    source,
                })?;

            info!(backup_time = %backup_time, "Deleted old backup");
            report.deleted.push(name);
        }

        Ok(report)
    }
}
