use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

/// Everything a Host Monitor reports while it runs. Every variant carries the host label.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    UnpinnedHostIdentity {
        host: String,
    },
    Connected {
        host: String,
    },
    ConnectFailed {
        host: String,
        error: String,
        retry_in: Duration,
    },
    ConnectionLost {
        host: String,
    },
    DiscoveryFailed {
        host: String,
        remote_root: PathBuf,
        error: String,
    },
    FilesDiscovered {
        host: String,
        remote_root: PathBuf,
        count: usize,
    },
    PathFallback {
        host: String,
        remote: PathBuf,
        local: PathBuf,
    },
    TransferStarted {
        host: String,
        remote: PathBuf,
        local: PathBuf,
    },
    TransferCompleted {
        host: String,
        remote: PathBuf,
        local: PathBuf,
        bytes: u64,
    },
    SizeMismatch {
        host: String,
        remote: PathBuf,
        expected: u64,
        copied: u64,
    },
    TransferFailed {
        host: String,
        remote: PathBuf,
        error: String,
    },
    RemoteDeleteFailed {
        host: String,
        remote: PathBuf,
        local: PathBuf,
        error: String,
        attempts: u32,
        stuck: bool,
    },
    CycleCompleted {
        host: String,
        transferred: usize,
        failed: usize,
    },
    ShutdownAcknowledged {
        host: String,
    },
}

/// Logs host events and optionally forwards them to a channel.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<HostEvent>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self { tx: None }
    }

    pub fn with_channel(tx: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn emit(&self, event: HostEvent) {
        log_event(&event);
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening any more.
            let _ = tx.send(event);
        }
    }
}

fn log_event(event: &HostEvent) {
    match event {
        HostEvent::UnpinnedHostIdentity { host } => tracing::warn!(
            "No host_key configured for {}; any server identity will be accepted",
            host
        ),
        HostEvent::Connected { host } => tracing::info!("Successfully connected to {}", host),
        HostEvent::ConnectFailed {
            host,
            error,
            retry_in,
        } => tracing::error!(
            "Error connecting to {}: {} (retrying in {}s)",
            host,
            error,
            retry_in.as_secs()
        ),
        HostEvent::ConnectionLost { host } => {
            tracing::warn!("Connection to {} lost, reconnecting", host)
        }
        HostEvent::DiscoveryFailed {
            host,
            remote_root,
            error,
        } => tracing::error!(
            "Failed to find files in {} on {}: {}",
            remote_root.display(),
            host,
            error
        ),
        HostEvent::FilesDiscovered {
            host,
            remote_root,
            count,
        } => tracing::debug!(
            "Found {} settled files in {} on {}",
            count,
            remote_root.display(),
            host
        ),
        HostEvent::PathFallback {
            host,
            remote,
            local,
        } => tracing::warn!(
            "{} on {} is outside its remote directory; saving as {}",
            remote.display(),
            host,
            local.display()
        ),
        HostEvent::TransferStarted {
            host,
            remote,
            local,
        } => tracing::info!(
            "Downloading {} from {} to {}",
            remote.display(),
            host,
            local.display()
        ),
        HostEvent::TransferCompleted {
            host,
            remote,
            local,
            bytes,
        } => tracing::info!(
            "Downloaded and deleted {} ({} bytes) from {}. Local copy: {}",
            remote.display(),
            bytes,
            host,
            local.display()
        ),
        HostEvent::SizeMismatch {
            host,
            remote,
            expected,
            copied,
        } => tracing::error!(
            "Size mismatch for {} on {}: expected {} bytes, copied {}; remote file kept",
            remote.display(),
            host,
            expected,
            copied
        ),
        HostEvent::TransferFailed {
            host,
            remote,
            error,
        } => tracing::error!(
            "Failed to download {} from {}: {}",
            remote.display(),
            host,
            error
        ),
        HostEvent::RemoteDeleteFailed {
            host,
            remote,
            local,
            error,
            attempts,
            stuck,
        } => {
            if *stuck {
                tracing::error!(
                    "Remote file {} on {} is stuck: delete failed {} times in a row ({}). Local copy is complete: {}",
                    remote.display(),
                    host,
                    attempts,
                    error,
                    local.display()
                )
            } else {
                tracing::warn!(
                    "Failed to delete {} on {} after a verified copy: {}. Local copy: {}",
                    remote.display(),
                    host,
                    error,
                    local.display()
                )
            }
        }
        HostEvent::CycleCompleted {
            host,
            transferred,
            failed,
        } => tracing::debug!(
            "Poll cycle on {} finished: {} transferred, {} failed",
            host,
            transferred,
            failed
        ),
        HostEvent::ShutdownAcknowledged { host } => tracing::info!(
            "Shutdown signal received, closing SSH connection for {}",
            host
        ),
    }
}
