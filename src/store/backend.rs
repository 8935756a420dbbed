//! Backend trait for backup object stores.
//!
//! Defines the interface every bucket backend must implement (GCS, S3,
//! local filesystem, in-memory). The backup pipeline only ever talks to
//! this trait.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

/// One element of a listing: an object name, or the error that ended it.
pub type ListEntry = Result<String>;

/// Capacity of the listing channel. The producer blocks until the consumer
/// has taken the previous name.
pub const LIST_CHANNEL_CAPACITY: usize = 1;

/// Backend trait for backup object storage.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Stores `data` under `name`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or is rejected by the backend.
    async fn create(&self, name: &str, data: Bytes) -> Result<()>;

    /// Retrieves the object stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist or cannot be read.
    async fn read(&self, name: &str) -> Result<Bytes>;

    /// Lists every object in the bucket.
    ///
    /// Names are produced by a background task into a channel of capacity
    /// [`LIST_CHANNEL_CAPACITY`]. An `Err` entry is always the last one.
    /// The producer stops without finishing once `deadline` passes or the
    /// receiver is dropped; either way the channel is closed. No ordering
    /// is guaranteed.
    fn list(&self, deadline: Instant) -> mpsc::Receiver<ListEntry>;

    /// Deletes the object stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the deletion.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to shut down cleanly.
    async fn close(&self) -> Result<()>;
}

/// Pumps `entries` into `tx` until the stream ends, an error is sent, the
/// receiver goes away, or `deadline` passes.
///
/// The deadline is only observed between items.
pub(crate) async fn forward_listing<S>(
    mut entries: S,
    tx: mpsc::Sender<ListEntry>,
    deadline: Instant,
) where
    S: Stream<Item = ListEntry> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = sleep_until(deadline) => {
                tracing::debug!("listing deadline reached while fetching");
                return;
            },
            next = entries.next() => next,
        };

        let Some(entry) = next else {
            return;
        };
        let is_error = entry.is_err();

        tokio::select! {
            biased;
            () = sleep_until(deadline) => {
                tracing::debug!("listing deadline reached while waiting for consumer");
                return;
            },
            sent = tx.send(entry) => {
                if sent.is_err() {
                    return;
                }
            },
        }

        if is_error {
            return;
        }
    }
}
