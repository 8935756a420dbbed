//! Shared fixtures for backup integration tests.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::StreamExt;
use kubeadm_backup::archive::PKI_FILES;
use kubeadm_backup::etcd::{SnapshotStream, StoreClient};
use kubeadm_backup::store::{LIST_CHANNEL_CAPACITY, ListEntry, ObjectStore};
use std::fs;
use std::io::Read;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Creates a kubeadm PKI directory holding every backed-up file.
pub fn pki_dir() -> TempDir {
    let dir = tempdir().expect("Failed to create temp dir");
    fs::create_dir_all(dir.path().join("etcd")).expect("Failed to create etcd dir");
    for pki_file in PKI_FILES {
        fs::write(dir.path().join(pki_file), format!("pem for {pki_file}"))
            .expect("Failed to write pki file");
    }
    dir
}

/// etcd stand-in serving a fixed snapshot in 1 MiB chunks.
pub struct FakeEtcd {
    snapshot: Bytes,
}

impl FakeEtcd {
    pub fn new(snapshot: Vec<u8>) -> Self {
        Self {
            snapshot: Bytes::from(snapshot),
        }
    }
}

#[async_trait]
impl StoreClient for FakeEtcd {
    async fn sync(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<SnapshotStream> {
        const CHUNK: usize = 1 << 20;
        let snapshot = self.snapshot.clone();
        let chunks: Vec<anyhow::Result<Bytes>> = (0..snapshot.len())
            .step_by(CHUNK)
            .map(|start| Ok(snapshot.slice(start..(start + CHUNK).min(snapshot.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Bucket that refuses every request.
pub struct UnreachableStore;

#[async_trait]
impl ObjectStore for UnreachableStore {
    async fn create(&self, _name: &str, _data: Bytes) -> anyhow::Result<()> {
        Err(anyhow!("dial tcp: connection refused"))
    }

    async fn read(&self, _name: &str) -> anyhow::Result<Bytes> {
        Err(anyhow!("dial tcp: connection refused"))
    }

    fn list(&self, _deadline: Instant) -> mpsc::Receiver<ListEntry> {
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let _ = tx.send(Err(anyhow!("dial tcp: connection refused"))).await;
        });
        rx
    }

    async fn delete(&self, _name: &str) -> anyhow::Result<()> {
        Err(anyhow!("dial tcp: connection refused"))
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Entry paths and contents of a `tar.gz` archive, in order.
pub fn archive_entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.entries()
        .expect("Failed to read archive")
        .map(|entry| {
            let mut entry = entry.expect("Failed to read entry");
            let path = entry.path().expect("Bad entry path").display().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).expect("Failed to read entry data");
            (path, data)
        })
        .collect()
}
