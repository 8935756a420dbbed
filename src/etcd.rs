//! etcd access for the backup pipeline.
//!
//! The pipeline needs exactly two things from the cluster: a membership
//! sync (proves the cluster is reachable and refreshes the member list)
//! and a consistent snapshot byte stream. [`StoreClient`] captures that
//! contract; [`EtcdClient`] implements it with `etcd-client`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{Certificate, Client, ConnectOptions, Identity, TlsOptions};
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Stream of raw snapshot chunks, in order.
pub type SnapshotStream = BoxStream<'static, Result<Bytes>>;

/// The operations the backup pipeline consumes from the key-value store.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Synchronizes cluster membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be reached.
    async fn sync(&self) -> Result<()>;

    /// Opens a consistent point-in-time snapshot of the whole keyspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be started. Failures while
    /// streaming surface as `Err` items of the stream.
    async fn snapshot(&self) -> Result<SnapshotStream>;
}

/// Connection settings for etcd.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoint: String,
    pub ca_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
}

impl EtcdConfig {
    fn tls_options(&self) -> Result<Option<TlsOptions>> {
        if self.ca_file.is_none() && self.key_file.is_none() && self.cert_file.is_none() {
            return Ok(None);
        }

        let mut tls = TlsOptions::new();

        if let Some(ca_file) = &self.ca_file {
            let ca_pem = std::fs::read(ca_file)
                .with_context(|| format!("error reading etcd ca {}", ca_file.display()))?;
            tls = tls.ca_certificate(Certificate::from_pem(ca_pem));
        }

        match (&self.key_file, &self.cert_file) {
            (Some(key_file), Some(cert_file)) => {
                let key_pem = std::fs::read(key_file)
                    .with_context(|| format!("error reading etcd key {}", key_file.display()))?;
                let cert_pem = std::fs::read(cert_file).with_context(|| {
                    format!("error reading etcd certificate {}", cert_file.display())
                })?;
                tls = tls.identity(Identity::from_pem(cert_pem, key_pem));
            },
            (None, None) => {},
            _ => bail!("both etcd-key-file and etcd-certificate-file must be given"),
        }

        Ok(Some(tls))
    }
}

/// etcd client used for snapshots.
#[derive(Clone)]
pub struct EtcdClient {
    client: Client,
    /// Client URLs advertised by the members at the last sync.
    members: Arc<RwLock<Vec<String>>>,
}

impl EtcdClient {
    /// Connects to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS material cannot be loaded or the
    /// client cannot be created.
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let mut options = ConnectOptions::new().with_connect_timeout(Duration::from_secs(10));
        if let Some(tls) = config
            .tls_options()
            .context("error loading etcd certificates")?
        {
            options = options.with_tls(tls);
        }

        let client = Client::connect([config.endpoint.as_str()], Some(options))
            .await
            .context("error creating etcd client")?;

        Ok(Self {
            client,
            members: Arc::default(),
        })
    }

    /// Client URLs learned at the last successful sync.
    pub fn member_urls(&self) -> Vec<String> {
        self.members.read().clone()
    }
}

#[async_trait]
impl StoreClient for EtcdClient {
    async fn sync(&self) -> Result<()> {
        let mut client = self.client.clone();
        let response = client
            .member_list()
            .await
            .context("error listing etcd members")?;

        let urls: Vec<String> = response
            .members()
            .iter()
            .flat_map(|member| member.client_urls().iter().cloned())
            .collect();
        if urls.is_empty() {
            bail!("etcd returned no member client urls");
        }

        tracing::debug!(members = ?urls, "synced etcd members");
        *self.members.write() = urls;
        Ok(())
    }

    async fn snapshot(&self) -> Result<SnapshotStream> {
        let mut client = self.client.clone();
        let streaming = client
            .snapshot()
            .await
            .context("error starting etcd snapshot")?;

        let chunks = futures::stream::try_unfold(streaming, |mut streaming| async move {
            let next = streaming
                .message()
                .await
                .context("error receiving etcd snapshot chunk")?;
            Ok::<_, anyhow::Error>(
                next.map(|response| (Bytes::copy_from_slice(response.blob()), streaming)),
            )
        });

        Ok(chunks.boxed())
    }
}
