//! Command-line configuration.
//!
//! Every flag can also be set through an environment variable. Durations
//! accept `humantime` syntax (`90s`, `1h`, `30days`).

use anyhow::{Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::etcd::EtcdConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Periodically backs up etcd and the kubeadm PKI to object storage.
#[derive(Debug, Clone, Parser)]
#[command(name = "kubeadm-backup", version, about)]
pub struct Cli {
    /// etcd endpoint to snapshot
    #[arg(long, env = "ETCD_ENDPOINT", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoint: String,

    /// CA bundle used to verify etcd
    #[arg(long, env = "ETCD_CA_FILE")]
    pub etcd_ca_file: Option<PathBuf>,

    /// Client key for etcd (requires --etcd-certificate-file)
    #[arg(long, env = "ETCD_KEY_FILE")]
    pub etcd_key_file: Option<PathBuf>,

    /// Client certificate for etcd (requires --etcd-key-file)
    #[arg(long, env = "ETCD_CERTIFICATE_FILE")]
    pub etcd_certificate_file: Option<PathBuf>,

    /// Directory holding the kubeadm PKI
    #[arg(long, env = "KUBEADM_PKI_DIRECTORY")]
    pub kubeadm_pki_directory: PathBuf,

    /// Time between backups
    #[arg(long, env = "BACKUP_INTERVAL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub backup_interval: Duration,

    /// How long backups are kept
    #[arg(long, env = "BACKUP_TTL", default_value = "30days", value_parser = humantime::parse_duration)]
    pub backup_ttl: Duration,

    /// Blob storage configuration file (TOML)
    #[arg(long, env = "BLOB_CONFIG_FILE")]
    pub blob_config_file: PathBuf,

    /// Address for the Prometheus metrics listener
    #[arg(long, env = "METRICS_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_address: SocketAddr,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Keep backups in memory instead of the configured bucket
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Checks flag combinations clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero interval or a half-specified etcd
    /// client identity.
    pub fn validate(&self) -> Result<()> {
        if self.backup_interval.is_zero() {
            bail!("--backup-interval must be greater than zero");
        }
        if self.etcd_key_file.is_some() != self.etcd_certificate_file.is_some() {
            bail!("--etcd-key-file and --etcd-certificate-file must be given together");
        }
        Ok(())
    }

    /// Default tracing directive for the verbosity level.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn etcd_config(&self) -> EtcdConfig {
        EtcdConfig {
            endpoint: self.etcd_endpoint.clone(),
            ca_file: self.etcd_ca_file.clone(),
            key_file: self.etcd_key_file.clone(),
            cert_file: self.etcd_certificate_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 5] = [
        "kubeadm-backup",
        "--kubeadm-pki-directory",
        "/etc/kubernetes/pki",
        "--blob-config-file",
        "/etc/backup/blob.toml",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(REQUIRED.iter().chain(extra).copied())
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]).unwrap();

        assert_eq!(cli.etcd_endpoint, "http://127.0.0.1:2379");
        assert_eq!(cli.backup_interval, Duration::from_secs(60 * 60));
        assert_eq!(cli.backup_ttl, Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(cli.metrics_address, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.log_level(), "info");
        assert!(!cli.dry_run);
        cli.validate().unwrap();
    }

    #[test]
    fn test_missing_required_flag() {
        let err = Cli::try_parse_from(["kubeadm-backup", "--blob-config-file", "b.toml"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_durations_and_verbosity() {
        let cli = parse(&["--backup-interval", "15m", "--backup-ttl", "720h", "-vv"]).unwrap();

        assert_eq!(cli.backup_interval, Duration::from_secs(15 * 60));
        assert_eq!(cli.backup_ttl, Duration::from_secs(720 * 60 * 60));
        assert_eq!(cli.log_level(), "trace");
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(parse(&["--backup-interval", "soon"]).is_err());
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let cli = parse(&["--backup-interval", "0s"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_half_identity_is_invalid() {
        let cli = parse(&["--etcd-key-file", "/pki/etcd/client.key"]).unwrap();
        let err = cli.validate().unwrap_err();
        assert!(err.to_string().contains("--etcd-certificate-file"));
    }

    #[test]
    fn test_etcd_config() {
        let cli = parse(&[
            "--etcd-endpoint",
            "https://10.0.0.1:2379",
            "--etcd-ca-file",
            "/pki/etcd/ca.crt",
        ])
        .unwrap();

        let etcd = cli.etcd_config();
        assert_eq!(etcd.endpoint, "https://10.0.0.1:2379");
        assert_eq!(etcd.ca_file, Some(PathBuf::from("/pki/etcd/ca.crt")));
        assert!(etcd.key_file.is_none());
    }
}
