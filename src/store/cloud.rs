//! Bucket backends built on the `object_store` crate.
//!
//! One adapter serves Google Cloud Storage, S3-compatible stores and a
//! local directory; only the builder differs.

use super::backend::{LIST_CHANNEL_CAPACITY, ListEntry, ObjectStore, forward_listing};
use super::config::{FilesystemConfig, GcsConfig, S3Config};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, PutPayload};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Object store backed by a cloud bucket or a local directory.
#[derive(Clone)]
pub struct CloudStore {
    inner: Arc<dyn object_store::ObjectStore>,
    bucket: String,
}

impl CloudStore {
    /// Wraps an existing `object_store` implementation.
    pub fn new(inner: Arc<dyn object_store::ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            inner,
            bucket: bucket.into(),
        }
    }

    /// Connects to a Google Cloud Storage bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be resolved.
    pub fn gcs(config: &GcsConfig) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .with_client_options(client_options());

        if let Some(key) = config.service_account.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.with_service_account_key(key);
        }

        let store = builder.build().context("error creating gcs client")?;
        Ok(Self::new(Arc::new(store), &config.bucket))
    }

    /// Connects to an S3-compatible bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or credentials are invalid.
    pub fn s3(config: &S3Config) -> Result<Self> {
        let options = client_options()
            .with_pool_idle_timeout(config.http_config.idle_conn_timeout)
            .with_timeout(config.http_config.response_header_timeout)
            .with_allow_invalid_certificates(config.http_config.insecure_skip_verify)
            .with_allow_http(config.insecure);

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_client_options(options);

        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.with_endpoint(endpoint_url(endpoint, config.insecure));
        }

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }

        let store = builder.build().context("error creating s3 client")?;
        Ok(Self::new(Arc::new(store), &config.bucket))
    }

    /// Uses a local directory as the bucket, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn filesystem(config: &FilesystemConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path).with_context(|| {
            format!("Failed to create backup directory: {}", config.path.display())
        })?;

        let store = LocalFileSystem::new_with_prefix(&config.path)
            .with_context(|| format!("error opening {}", config.path.display()))?;
        Ok(Self::new(
            Arc::new(store),
            config.path.display().to_string(),
        ))
    }
}

fn client_options() -> ClientOptions {
    ClientOptions::default().with_connect_timeout(Duration::from_secs(30))
}

/// Adds a scheme to bare `host:port` endpoints.
fn endpoint_url(endpoint: &str, insecure: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if insecure {
        format!("http://{endpoint}")
    } else {
        format!("https://{endpoint}")
    }
}

#[async_trait]
impl ObjectStore for CloudStore {
    async fn create(&self, name: &str, data: Bytes) -> Result<()> {
        self.inner
            .put(&ObjectPath::from(name), PutPayload::from(data))
            .await
            .with_context(|| format!("error writing object {name} to bucket {}", self.bucket))?;
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let location = ObjectPath::from(name);
        let result = self
            .inner
            .get(&location)
            .await
            .with_context(|| format!("error opening object {name} in bucket {}", self.bucket))?;
        result
            .bytes()
            .await
            .with_context(|| format!("error reading object {name} from bucket {}", self.bucket))
    }

    fn list(&self, deadline: Instant) -> mpsc::Receiver<ListEntry> {
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAPACITY);
        let inner = Arc::clone(&self.inner);
        let bucket = self.bucket.clone();

        tokio::spawn(async move {
            let entries = inner.list(None).map(|item| {
                item.map(|meta| meta.location.to_string())
                    .with_context(|| format!("error listing objects in bucket {bucket}"))
            });
            forward_listing(entries, tx, deadline).await;
        });

        rx
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.inner.delete(&ObjectPath::from(name)).await {
            Ok(()) => Ok(()),
            Err(error @ object_store::Error::NotFound { .. }) => {
                tracing::warn!(object = %name, %error, "backup already gone from storage");
                Ok(())
            },
            Err(error) => Err(error)
                .with_context(|| format!("error deleting object {name} from bucket {}", self.bucket)),
        }
    }

    async fn close(&self) -> Result<()> {
        // object_store clients release their connection pools on drop.
        Ok(())
    }
}
