use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod app_event;
mod config;
mod error;
mod models;
mod monitor;
mod privileges;
mod sftp_logic;
mod shutdown;
mod ssh_service;

use app_event::EventSink;
use config::ConfigManager;
use models::HostDescriptor;
use monitor::HostMonitor;
use ssh_service::SshConnector;

/// Pull settled files from remote hosts over SSH and delete them after a verified copy
#[derive(Debug, Parser)]
#[command(name = "sshpull", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long = "cfg")]
    config: Option<PathBuf>,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn init_logging(log_dir: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("sshpull=info".parse()?);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let log_file = dir.join(format!(
                "sshpull_{}.log",
                Local::now().format("%Y%m%d_%H%M%S")
            ));
            let file = File::create(&log_file)
                .with_context(|| format!("Failed to create log file {}", log_file.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Warn about every host whose key cannot be loaded. The monitors keep retrying regardless, in
/// case the key shows up later. Returns the number of hosts affected.
fn report_unreadable_keys(hosts: &[HostDescriptor]) -> usize {
    let mut unreadable = 0;
    for host in hosts {
        if let Err(e) = ssh_service::load_private_key(&host.key_path, &host.user) {
            warn!("Host {}: {}", host.name, e);
            unreadable += 1;
        }
    }
    unreadable
}

/// Switch to the configured uid/gid, then check key material as that user.
fn become_service_user(
    uid: Option<u32>,
    gid: Option<u32>,
    hosts: &[HostDescriptor],
) -> Result<usize> {
    privileges::drop_privileges(uid, gid).context("Error dropping privileges")?;
    Ok(report_unreadable_keys(hosts))
}

/// Resolves once SIGINT or SIGTERM arrives
async fn wait_for_termination() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for SIGINT")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_ref())?;

    let config_manager = ConfigManager::new(cli.config.clone())?;
    debug!("Loading configuration from {}", config_manager.get_config_path().display());
    let config = config_manager.load_config()?;
    let hosts = config.host_descriptors()?;
    let settings = config.settings();

    if cli.check {
        report_unreadable_keys(&hosts);
        for host in &hosts {
            println!(
                "{} ({}@{}) every {}s, {} directory pair(s), host key {}",
                host.name,
                host.user,
                host.address(),
                host.interval.as_secs(),
                host.directory_pairs.len(),
                if host.host_identity.is_some() { "pinned" } else { "NOT pinned" }
            );
        }
        return Ok(());
    }

    become_service_user(config.uid, config.gid, &hosts)?;

    let (trigger, shutdown) = shutdown::channel();
    let connector = Arc::new(SshConnector);
    let events = EventSink::new();

    let mut monitors = Vec::with_capacity(hosts.len());
    for host in hosts {
        info!("Monitoring {} ({} directory pairs)", host.name, host.directory_pairs.len());
        let monitor = HostMonitor::new(
            host,
            connector.clone(),
            settings,
            shutdown.clone(),
            events.clone(),
        );
        monitors.push(tokio::spawn(monitor.run()));
    }

    wait_for_termination().await?;
    info!("Received shutdown signal, cleaning up...");
    trigger.trigger();

    for handle in monitors {
        if let Err(e) = handle.await {
            warn!("Host monitor ended abnormally: {}", e);
        }
    }
    info!("All host monitors stopped");

    Ok(())
}
