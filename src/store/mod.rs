//! Object storage for backup archives.
//!
//! Backups are written to a bucket through the [`ObjectStore`] trait.
//! Available backends:
//!
//! - [`CloudStore`] - GCS, S3-compatible stores and local directories
//! - [`MemoryStore`] - non-persistent, for tests and dry runs
//!
//! Backends are selected by the blob storage configuration file
//! (see [`BlobStorageConfig`]).

mod backend;
mod cloud;
mod config;
mod memory;

use anyhow::{Context, Result};
use std::sync::Arc;

pub use backend::{LIST_CHANNEL_CAPACITY, ListEntry, ObjectStore};
pub(crate) use backend::forward_listing;
pub use cloud::CloudStore;
pub use config::{
    BlobStorageConfig, BlobStorageType, FilesystemConfig, GcsConfig, HttpConfig, S3Config,
};
pub use memory::MemoryStore;

/// Creates the backend selected by `config`.
///
/// # Errors
///
/// Returns an error if the backend client cannot be constructed.
pub fn from_config(config: &BlobStorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store = match config {
        BlobStorageConfig::Gcs(gcs) => CloudStore::gcs(gcs),
        BlobStorageConfig::S3(s3) => CloudStore::s3(s3),
        BlobStorageConfig::Filesystem(fs_config) => CloudStore::filesystem(fs_config),
    }
    .with_context(|| format!("failed to create blob client {:?}", config.kind()))?;

    Ok(Arc::new(store))
}
