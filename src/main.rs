use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use kubeadm_backup::archive::ArchiveBuilder;
use kubeadm_backup::config::{Cli, LogFormat};
use kubeadm_backup::etcd::EtcdClient;
use kubeadm_backup::metrics::{PrometheusSink, install_exporter};
use kubeadm_backup::retention::RetentionManager;
use kubeadm_backup::scheduler::{Backup, Scheduler, error_chain};
use kubeadm_backup::store::{self, BlobStorageConfig, MemoryStore, ObjectStore};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    let registry = tracing_subscriber::registry().with(filter);

    match cli.log_format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    cli.validate().context("invalid configuration")?;

    let blob_config = BlobStorageConfig::load_from(&cli.blob_config_file)?;
    let store: Arc<dyn ObjectStore> = if cli.dry_run {
        warn!("dry run, backups are kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        store::from_config(&blob_config)?
    };

    let etcd = EtcdClient::connect(&cli.etcd_config())
        .await
        .context("failed to create etcd client")?;

    install_exporter(cli.metrics_address)?;
    let metrics = Arc::new(PrometheusSink::register());

    let job = Backup::new(
        RetentionManager::new(store.clone(), cli.backup_ttl),
        ArchiveBuilder::new(store.clone(), Arc::new(etcd), &cli.kubeadm_pki_directory),
    );
    let mut scheduler = Scheduler::new(job, metrics, cli.backup_interval);

    info!(
        etcd = %cli.etcd_endpoint,
        bucket = ?blob_config.kind(),
        interval = ?cli.backup_interval,
        ttl = ?cli.backup_ttl,
        metrics = %cli.metrics_address,
        "starting kubeadm backup"
    );

    let outcome = tokio::select! {
        result = scheduler.run() => Some(result),
        () = shutdown_signal() => None,
    };

    if let Err(err) = store.close().await {
        warn!(error = %format!("{err:#}"), "error closing object store");
    }

    match outcome {
        None => {
            info!("shutting down");
            Ok(())
        },
        Some(Err(err)) => anyhow::bail!("initial backup failed: {}", error_chain(&err)),
        Some(Ok(never)) => match never {},
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
