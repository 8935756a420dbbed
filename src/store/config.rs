//! Blob storage configuration file.
//!
//! The file selects a backend with `type` and carries the backend settings
//! in a `[config]` table:
//!
//! ```toml
//! type = "s3"
//!
//! [config]
//! bucket = "cluster-backups"
//! endpoint = "minio.internal:9000"
//! insecure = true
//! access_key = "backup"
//! secret_key = "..."
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supported bucket backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStorageType {
    Gcs,
    S3,
    Filesystem,
}

impl BlobStorageType {
    /// Parses a backend name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GCS" => Some(Self::Gcs),
            "S3" => Some(Self::S3),
            "FILESYSTEM" => Some(Self::Filesystem),
            _ => None,
        }
    }
}

/// Raw file layout before the backend table is interpreted.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBlobStorageConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    config: toml::Table,
}

/// Parsed blob storage configuration.
#[derive(Debug, Clone)]
pub enum BlobStorageConfig {
    Gcs(GcsConfig),
    S3(S3Config),
    Filesystem(FilesystemConfig),
}

/// Google Cloud Storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
    /// Inline service account JSON key. Default credentials when absent.
    #[serde(default)]
    pub service_account: Option<String>,
}

/// S3-compatible storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Host (optionally with scheme) of the S3 endpoint. AWS when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Use plain HTTP.
    #[serde(default)]
    pub insecure: bool,
    /// Static credentials. Environment/instance credentials when absent.
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub http_config: HttpConfig,
}

/// HTTP transport tuning for S3.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_conn_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub response_header_timeout: Duration,
    pub insecure_skip_verify: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            idle_conn_timeout: Duration::from_secs(90),
            response_header_timeout: Duration::from_secs(120),
            insecure_skip_verify: false,
        }
    }
}

/// Local directory acting as a bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    pub path: PathBuf,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl BlobStorageConfig {
    /// Load the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML,
    /// names an unknown backend, or misses required backend settings.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| {
            format!("error reading blob storage config file {}", path.display())
        })?;

        Self::parse(&content)
            .with_context(|| format!("error parsing blob storage config {}", path.display()))
    }

    /// Parse the configuration from TOML text.
    ///
    /// # Errors
    ///
    /// See [`BlobStorageConfig::load_from`].
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawBlobStorageConfig =
            toml::from_str(content).context("error unmarshaling blob storage config")?;

        let Some(kind) = BlobStorageType::parse(&raw.kind) else {
            bail!("blob storage config with type {} not supported", raw.kind);
        };

        let table = toml::Value::Table(raw.config);
        let config = match kind {
            BlobStorageType::Gcs => {
                let gcs: GcsConfig = table.try_into().context("error parsing gcs config")?;
                if gcs.bucket.is_empty() {
                    bail!("missing gcs bucket name in blob storage config");
                }
                Self::Gcs(gcs)
            },
            BlobStorageType::S3 => {
                let s3: S3Config = table.try_into().context("error parsing s3 config")?;
                if s3.bucket.is_empty() {
                    bail!("missing s3 bucket name in blob storage config");
                }
                if s3.access_key.is_some() != s3.secret_key.is_some() {
                    bail!("both access_key and secret_key must be given");
                }
                Self::S3(s3)
            },
            BlobStorageType::Filesystem => {
                let fs_config: FilesystemConfig =
                    table.try_into().context("error parsing filesystem config")?;
                if fs_config.path.as_os_str().is_empty() {
                    bail!("missing path in filesystem blob storage config");
                }
                Self::Filesystem(fs_config)
            },
        };

        Ok(config)
    }

    /// Returns the backend type.
    pub fn kind(&self) -> BlobStorageType {
        match self {
            Self::Gcs(_) => BlobStorageType::Gcs,
            Self::S3(_) => BlobStorageType::S3,
            Self::Filesystem(_) => BlobStorageType::Filesystem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_s3_with_defaults() {
        let config = BlobStorageConfig::parse(
            r#"
            type = "s3"
            [config]
            bucket = "backups"
            endpoint = "minio:9000"
            "#,
        )
        .unwrap();

        let BlobStorageConfig::S3(s3) = config else {
            panic!("expected s3 config");
        };
        assert_eq!(s3.bucket, "backups");
        assert_eq!(s3.endpoint.as_deref(), Some("minio:9000"));
        assert_eq!(s3.region, "us-east-1");
        assert!(!s3.insecure);
        assert_eq!(s3.http_config.idle_conn_timeout, Duration::from_secs(90));
        assert_eq!(s3.http_config.response_header_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_parse_s3_http_config() {
        let config = BlobStorageConfig::parse(
            r#"
            type = "S3"
            [config]
            bucket = "backups"
            access_key = "ak"
            secret_key = "sk"
            [config.http_config]
            idle_conn_timeout = "30s"
            response_header_timeout = "5m"
            insecure_skip_verify = true
            "#,
        )
        .unwrap();

        let BlobStorageConfig::S3(s3) = config else {
            panic!("expected s3 config");
        };
        assert_eq!(s3.http_config.idle_conn_timeout, Duration::from_secs(30));
        assert_eq!(s3.http_config.response_header_timeout, Duration::from_secs(300));
        assert!(s3.http_config.insecure_skip_verify);
    }

    #[test]
    fn test_type_is_case_insensitive() {
        let config = BlobStorageConfig::parse(
            r#"
            type = "Gcs"
            [config]
            bucket = "b"
            "#,
        )
        .unwrap();
        assert_eq!(config.kind(), BlobStorageType::Gcs);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = BlobStorageConfig::parse("type = \"azure\"\n").unwrap_err();
        assert!(err.to_string().contains("azure"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let result = BlobStorageConfig::parse(
            r#"
            type = "gcs"
            bucket = "misplaced"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_bucket_rejected() {
        assert!(BlobStorageConfig::parse("type = \"gcs\"\n[config]\nbucket = \"\"\n").is_err());
        assert!(BlobStorageConfig::parse("type = \"s3\"\n").is_err());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let result = BlobStorageConfig::parse(
            r#"
            type = "s3"
            [config]
            bucket = "b"
            access_key = "only-this"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_filesystem_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "type = \"filesystem\"\n[config]\npath = \"/var/backups\"").unwrap();

        let config = BlobStorageConfig::load_from(file.path()).unwrap();
        let BlobStorageConfig::Filesystem(fs_config) = config else {
            panic!("expected filesystem config");
        };
        assert_eq!(fs_config.path, PathBuf::from("/var/backups"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = BlobStorageConfig::load_from("/nonexistent/blob.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/blob.toml"));
    }
}
