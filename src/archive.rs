//! Backup archive construction and upload.
//!
//! One invocation produces one `backup-<time>.tar.gz` object:
//!
//! 1. sync etcd membership
//! 2. drain a snapshot into memory (tar headers need the entry size up front)
//! 3. write `snapshot.db` followed by the PKI files under `certs/`
//! 4. finish the tar stream, then the gzip stream
//! 5. upload the finished buffer
//!
//! Any failure aborts the whole invocation before anything is uploaded.

use std::fs::{File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::StreamExt;
use tar::{EntryType, Header};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::etcd::StoreClient;
use crate::name::ObjectName;
use crate::store::ObjectStore;

/// Archive entry holding the etcd snapshot.
pub const SNAPSHOT_ENTRY: &str = "snapshot.db";

/// Directory inside the archive holding PKI files.
pub const CERTS_DIR: &str = "certs";

/// PKI files backed up from the kubeadm PKI directory, in archive order.
pub const PKI_FILES: [&str; 8] = [
    "ca.crt",
    "ca.key",
    "front-proxy-ca.crt",
    "front-proxy-ca.key",
    "sa.key",
    "sa.pub",
    "etcd/ca.crt",
    "etcd/ca.key",
];

const SNAPSHOT_MODE: u32 = 0o600;

/// Per-operation deadlines for one backup.
#[derive(Debug, Clone)]
pub struct ArchiveTimeouts {
    /// Membership sync.
    pub sync: Duration,
    /// Opening and draining the snapshot stream.
    pub snapshot: Duration,
    /// Uploading the finished archive.
    pub upload: Duration,
}

impl Default for ArchiveTimeouts {
    fn default() -> Self {
        Self {
            sync: Duration::from_secs(10),
            snapshot: Duration::from_secs(120),
            upload: Duration::from_secs(120),
        }
    }
}

/// A finished, compressed backup held in memory.
#[derive(Debug, Clone)]
pub struct BackupArchive {
    created_at: DateTime<Utc>,
    data: Bytes,
}

impl BackupArchive {
    /// Instant the archive was created; also the snapshot entry's mtime.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Object name the archive is uploaded under.
    pub fn name(&self) -> ObjectName {
        ObjectName::for_time(self.created_at)
    }

    /// Compressed archive bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// Takes backups of etcd and the kubeadm PKI directory.
pub struct ArchiveBuilder {
    store: Arc<dyn ObjectStore>,
    etcd: Arc<dyn StoreClient>,
    pki_dir: PathBuf,
    timeouts: ArchiveTimeouts,
}

impl ArchiveBuilder {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        etcd: Arc<dyn StoreClient>,
        pki_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            etcd,
            pki_dir: pki_dir.into(),
            timeouts: ArchiveTimeouts::default(),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ArchiveTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Takes one backup and uploads it, returning the object name.
    ///
    /// # Errors
    ///
    /// Returns the first failing step. Nothing is uploaded on error.
    pub async fn take(&self) -> Result<ObjectName> {
        timeout(self.timeouts.sync, self.etcd.sync())
            .await
            .map_err(|_| Error::timeout("etcd sync", self.timeouts.sync))?
            .map_err(Error::Sync)?;

        let snapshot = timeout(self.timeouts.snapshot, self.read_snapshot())
            .await
            .map_err(|_| Error::timeout("etcd snapshot", self.timeouts.snapshot))??;
        tracing::debug!(bytes = snapshot.len(), "etcd snapshot buffered");

        let created_at = Utc::now();
        let pki_dir = self.pki_dir.clone();
        let archive =
            tokio::task::spawn_blocking(move || build_archive(&snapshot, &pki_dir, created_at))
                .await??;

        let name = archive.name();
        tracing::debug!(
            object = %name,
            bytes = archive.data().len(),
            "uploading backup"
        );

        timeout(
            self.timeouts.upload,
            self.store.create(name.as_str(), archive.into_data()),
        )
        .await
        .map_err(|_| Error::timeout("backup upload", self.timeouts.upload))?
        .map_err(|source| Error::Upload {
            name: name.to_string(),
            source,
        })?;

        Ok(name)
    }

    async fn read_snapshot(&self) -> Result<Vec<u8>> {
        let mut chunks = self.etcd.snapshot().await.map_err(Error::Snapshot)?;

        let mut buf = Vec::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk
                .map_err(|e| Error::Snapshot(e.context("error copying etcd snapshot data")))?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

/// Packages a snapshot and the PKI files into a tar.gz archive.
///
/// # Errors
///
/// Fails if any PKI file is missing or unreadable, or if the archive
/// cannot be finalized.
pub fn build_archive(
    snapshot: &[u8],
    pki_dir: &Path,
    created_at: DateTime<Utc>,
) -> Result<BackupArchive> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(encoder);

    let mut header = regular_header(
        snapshot.len() as u64,
        SNAPSHOT_MODE,
        unix_seconds(created_at),
    );
    tar.append_data(&mut header, SNAPSHOT_ENTRY, snapshot)
        .map_err(|source| Error::Archive {
            action: "writing etcd snapshot to tar",
            source,
        })?;

    for pki_file in PKI_FILES {
        append_pki_file(&mut tar, pki_dir, pki_file)?;
    }

    // Order matters: the tar trailer must be inside the gzip stream.
    let encoder = tar.into_inner().map_err(|source| Error::Archive {
        action: "closing tar",
        source,
    })?;
    let data = encoder.finish().map_err(|source| Error::Archive {
        action: "closing gzip",
        source,
    })?;

    Ok(BackupArchive {
        created_at,
        data: Bytes::from(data),
    })
}

fn append_pki_file<W: Write>(
    tar: &mut tar::Builder<W>,
    pki_dir: &Path,
    pki_file: &str,
) -> Result<()> {
    let path = pki_dir.join(pki_file);

    let mut file = File::open(&path).map_err(|e| Error::pki("opening", &path, e))?;
    let metadata = file.metadata().map_err(|e| Error::pki("stat", &path, e))?;
    if !metadata.is_file() {
        return Err(Error::pki(
            "stat",
            &path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    let mtime = metadata
        .modified()
        .map_err(|e| Error::pki("stat", &path, e))?
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());

    let size = metadata.len();
    let mut data = Vec::with_capacity(usize::try_from(size).unwrap_or_default());
    file.read_to_end(&mut data)
        .map_err(|e| Error::pki("reading", &path, e))?;
    if data.len() as u64 != size {
        return Err(Error::pki(
            "reading",
            &path,
            io::Error::new(io::ErrorKind::UnexpectedEof, "file changed size while reading"),
        ));
    }

    let mut header = regular_header(size, file_mode(&metadata), mtime);
    tar.append_data(
        &mut header,
        format!("{CERTS_DIR}/{pki_file}"),
        data.as_slice(),
    )
    .map_err(|e| Error::pki("archiving", &path, e))
}

fn regular_header(size: u64, mode: u32, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header
}

fn unix_seconds(t: DateTime<Utc>) -> u64 {
    u64::try_from(t.timestamp()).unwrap_or(0)
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o644 }
}
