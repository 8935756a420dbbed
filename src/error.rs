//! Error types for the backup pipeline.
//!
//! Every variant names the operation that failed and keeps the underlying
//! cause as its source, so a logged error reads as a full causal chain.

use std::path::PathBuf;
use std::time::Duration;

/// Result type for backup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by a backup or cleanup pass.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Membership sync with the etcd cluster failed.
    #[error("error syncing etcd endpoints")]
    Sync(#[source] anyhow::Error),

    /// The snapshot stream could not be opened or drained.
    #[error("error trying to snapshot etcd")]
    Snapshot(#[source] anyhow::Error),

    /// A PKI file could not be opened, inspected or read.
    #[error("error {action} pki file {path:?}")]
    PkiFile {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing or finalizing the tar.gz archive failed.
    #[error("error {action}")]
    Archive {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The finished archive could not be uploaded.
    #[error("error uploading backup {name}")]
    Upload {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The object listing yielded an error.
    #[error("error listing backups")]
    List(#[source] anyhow::Error),

    /// An object in the bucket does not follow the backup naming scheme.
    #[error("error parsing backup time for object {name}")]
    InvalidObjectName {
        name: String,
        #[source]
        source: crate::name::NameError,
    },

    /// Deleting an expired backup failed.
    #[error("error deleting old backup taken at {backup_time}")]
    Delete {
        backup_time: String,
        #[source]
        source: anyhow::Error,
    },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {}s", timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// A blocking task panicked or was cancelled.
    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create a PKI file error for the given action ("opening", "stat", ...).
    pub fn pki(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PkiFile {
            action,
            path: path.into(),
            source,
        }
    }

    /// Create a timeout error.
    pub const fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// Returns true for errors caused by bad data rather than I/O.
    ///
    /// A malformed object name or an unusable PKI file will not fix itself
    /// by the next tick.
    pub fn is_data_integrity(&self) -> bool {
        match self {
            Self::InvalidObjectName { .. } => true,
            Self::PkiFile { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
