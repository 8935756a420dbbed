//! In-memory object store.
//!
//! Provides a non-persistent bucket using DashMap for concurrent access.
//! Used by tests and by `--dry-run`, where archives are built and kept in
//! process memory instead of being uploaded.

use super::backend::{LIST_CHANNEL_CAPACITY, ListEntry, ObjectStore, forward_listing};
use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// In-memory object store backed by DashMap.
///
/// All data is lost when the process exits. Clones share the same bucket.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates a new empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects in the bucket.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns every object name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the object stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.get(name).map(|e| e.value().clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(&self, name: &str, data: Bytes) -> Result<()> {
        if name.is_empty() {
            bail!("Object name cannot be empty");
        }
        self.objects.insert(name.to_string(), data);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        match self.get(name) {
            Some(data) => Ok(data),
            None => bail!("Object not found: {name}"),
        }
    }

    fn list(&self, deadline: Instant) -> mpsc::Receiver<ListEntry> {
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAPACITY);
        // Snapshot the keys so the producer holds no map guards while blocked.
        let entries: Vec<ListEntry> = self.objects.iter().map(|e| Ok(e.key().clone())).collect();
        tokio::spawn(forward_listing(futures::stream::iter(entries), tx, deadline));
        rx
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if self.objects.remove(name).is_none() {
            tracing::debug!(object = %name, "delete of missing object ignored");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn collect(store: &MemoryStore) -> Vec<String> {
        let mut rx = store.list(Instant::now() + Duration::from_secs(60));
        let mut names = Vec::new();
        while let Some(entry) = rx.recv().await {
            names.push(entry.unwrap());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = MemoryStore::new();

        store
            .create("backup-a.tar.gz", Bytes::from_static(b"Hello, World!"))
            .await
            .unwrap();

        let data = store.read("backup-a.tar.gz").await.unwrap();
        assert_eq!(&data[..], b"Hello, World!");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let store = MemoryStore::new();
        assert!(store.read("nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let store = MemoryStore::new();
        assert!(store.create("", Bytes::new()).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.create("a", Bytes::from_static(b"1")).await.unwrap();

        store.delete("a").await.unwrap();
        assert!(store.get("a").is_none());

        // Deleting again is not an error.
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_list() {
        let store = MemoryStore::new();
        for name in ["c", "a", "b"] {
            store.create(name, Bytes::new()).await.unwrap();
        }

        assert_eq!(collect(&store).await, ["a", "b", "c"]);
        assert_eq!(store.names(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_clones_share_bucket() {
        let store = MemoryStore::new();
        let other = store.clone();
        other.create("shared", Bytes::new()).await.unwrap();
        assert_eq!(store.names(), ["shared"]);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();
        store.create("a", Bytes::from_static(b"original")).await.unwrap();
        store.create("a", Bytes::from_static(b"updated")).await.unwrap();

        assert_eq!(&store.read("a").await.unwrap()[..], b"updated");
        assert_eq!(store.len(), 1);
    }
}
