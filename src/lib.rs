//! Periodic backups of etcd and the kubeadm PKI.
//!
//! Each cycle removes backups older than the retention ttl, then takes an
//! etcd snapshot, packs it with the PKI files into a `tar.gz` archive and
//! uploads it as `backup-<RFC3339 time>.tar.gz`.
//!
//! - [`scheduler`] - startup cycle and interval loop
//! - [`archive`] - snapshot, packing and upload
//! - [`retention`] - cleanup of expired backups
//! - [`store`] - object storage backends
//! - [`etcd`] - etcd client
//! - [`metrics`] - Prometheus gauges

pub mod archive;
pub mod config;
pub mod error;
pub mod etcd;
pub mod metrics;
pub mod name;
pub mod retention;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
