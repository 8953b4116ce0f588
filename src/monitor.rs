//! Per-host driving loop.
//!
//! Each monitor owns at most one session. It reconnects with a fixed backoff, polls every
//! directory pair in configuration order, and stops at the next iteration boundary once the
//! shared shutdown flag is set. All SSH and filesystem work runs on the blocking pool so a
//! stalled host only delays its own monitor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_event::{EventSink, HostEvent};
use crate::error::{ConnectionError, TransferError};
use crate::models::{HostDescriptor, MonitorSettings};
use crate::sftp_logic::{
    list_settled_files, map_to_local, pull, Connector, RemoteSession, TransferOutcome,
};
use crate::shutdown::Shutdown;

/// Lifecycle of one host's connection
pub enum MonitorState<S> {
    Disconnected,
    Connected(S),
    /// Terminal
    ShuttingDown,
}

/// Consecutive remote-delete failures per remote path
#[derive(Debug, Default)]
struct DeleteFailures {
    counts: HashMap<PathBuf, u32>,
}

impl DeleteFailures {
    fn record(&mut self, remote: &Path) -> u32 {
        let count = self.counts.entry(remote.to_path_buf()).or_insert(0);
        *count += 1;
        *count
    }

    fn clear(&mut self, remote: &Path) {
        self.counts.remove(remote);
    }

    /// Forget paths under `root` that discovery no longer returns
    fn retain_discovered(&mut self, root: &Path, discovered: &[PathBuf]) {
        self.counts
            .retain(|path, _| !path.starts_with(root) || discovered.contains(path));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.counts.len()
    }
}

/// Counters for one pass over all directory pairs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub transferred: usize,
    pub failed: usize,
    pub connection_lost: bool,
}

pub struct HostMonitor<C: Connector> {
    host: Arc<HostDescriptor>,
    connector: Arc<C>,
    settings: MonitorSettings,
    shutdown: Shutdown,
    events: EventSink,
    delete_failures: DeleteFailures,
}

impl<C: Connector> HostMonitor<C> {
    pub fn new(
        host: HostDescriptor,
        connector: Arc<C>,
        settings: MonitorSettings,
        shutdown: Shutdown,
        events: EventSink,
    ) -> Self {
        Self {
            host: Arc::new(host),
            connector,
            settings,
            shutdown,
            events,
            delete_failures: DeleteFailures::default(),
        }
    }

    fn name(&self) -> String {
        self.host.name.clone()
    }

    /// Run until shutdown. Never returns early because of remote or transfer failures.
    pub async fn run(mut self) {
        if self.host.host_identity.is_none() {
            self.events
                .emit(HostEvent::UnpinnedHostIdentity { host: self.name() });
        }

        let mut state = MonitorState::Disconnected;
        loop {
            state = self.step(state).await;
            if matches!(state, MonitorState::ShuttingDown) {
                return;
            }
        }
    }

    /// One iteration of the state machine
    pub async fn step(&mut self, state: MonitorState<C::Session>) -> MonitorState<C::Session> {
        if self.shutdown.is_triggered() {
            if let MonitorState::Connected(session) = state {
                close_session(session).await;
            }
            self.events
                .emit(HostEvent::ShutdownAcknowledged { host: self.name() });
            return MonitorState::ShuttingDown;
        }

        match state {
            MonitorState::Disconnected => match self.establish().await {
                Ok(session) => {
                    self.events.emit(HostEvent::Connected { host: self.name() });
                    MonitorState::Connected(session)
                }
                Err(e) => {
                    self.events.emit(HostEvent::ConnectFailed {
                        host: self.name(),
                        error: e.to_string(),
                        retry_in: self.settings.retry_backoff,
                    });
                    self.shutdown.sleep(self.settings.retry_backoff).await;
                    MonitorState::Disconnected
                }
            },
            MonitorState::Connected(session) => {
                let Some(session) = self.poll(session).await else {
                    self.events
                        .emit(HostEvent::ConnectionLost { host: self.name() });
                    return MonitorState::Disconnected;
                };
                self.shutdown.sleep(self.host.interval).await;
                MonitorState::Connected(session)
            }
            MonitorState::ShuttingDown => MonitorState::ShuttingDown,
        }
    }

    async fn establish(&self) -> Result<C::Session, ConnectionError> {
        let connector = self.connector.clone();
        let host = self.host.clone();
        let settings = self.settings;

        tokio::task::spawn_blocking(move || connector.establish(&host, &settings))
            .await
            .unwrap_or_else(|e| {
                Err(ConnectionError::Connect {
                    address: self.host.address(),
                    reason: format!("connect task failed: {}", e),
                })
            })
    }

    /// Run one cycle on the blocking pool. Returns the session if it is still usable.
    async fn poll(&mut self, mut session: C::Session) -> Option<C::Session> {
        let host = self.host.clone();
        let settings = self.settings;
        let shutdown = self.shutdown.clone();
        let events = self.events.clone();
        let mut failures = std::mem::take(&mut self.delete_failures);

        let joined = tokio::task::spawn_blocking(move || {
            let report = run_cycle(
                &mut session,
                &host,
                &settings,
                &shutdown,
                &events,
                &mut failures,
            );
            (session, failures, report)
        })
        .await;

        let (session, failures, report) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("Poll cycle for {} aborted: {}", self.host.name, e);
                return None;
            }
        };
        self.delete_failures = failures;

        self.events.emit(HostEvent::CycleCompleted {
            host: self.name(),
            transferred: report.transferred,
            failed: report.failed,
        });

        if report.connection_lost {
            close_session(session).await;
            None
        } else {
            Some(session)
        }
    }
}

async fn close_session<S: RemoteSession>(mut session: S) {
    if let Err(e) = tokio::task::spawn_blocking(move || session.close()).await {
        tracing::warn!("Closing session failed: {}", e);
    }
}

/// Walk every directory pair once: discover settled files, then pull each of them.
///
/// Stops early when shutdown is triggered (no new transfer starts) or when the session turns
/// out to be broken.
fn run_cycle<S: RemoteSession>(
    session: &mut S,
    host: &HostDescriptor,
    settings: &MonitorSettings,
    shutdown: &Shutdown,
    events: &EventSink,
    delete_failures: &mut DeleteFailures,
) -> CycleReport {
    let mut report = CycleReport::default();
    let name = || host.name.clone();

    'pairs: for pair in &host.directory_pairs {
        if shutdown.is_triggered() {
            break;
        }

        let files = match list_settled_files(session, &pair.remote_root, settings.quiescence) {
            Ok(files) => files,
            Err(e) => {
                events.emit(HostEvent::DiscoveryFailed {
                    host: name(),
                    remote_root: pair.remote_root.clone(),
                    error: e.to_string(),
                });
                if e.is_connection_broken() || !session.is_alive() {
                    report.connection_lost = true;
                    break;
                }
                continue;
            }
        };
        delete_failures.retain_discovered(&pair.remote_root, &files);
        events.emit(HostEvent::FilesDiscovered {
            host: name(),
            remote_root: pair.remote_root.clone(),
            count: files.len(),
        });

        for remote in files {
            if shutdown.is_triggered() {
                break 'pairs;
            }

            let mapped = map_to_local(&remote, pair);
            if mapped.degraded {
                events.emit(HostEvent::PathFallback {
                    host: name(),
                    remote: remote.clone(),
                    local: mapped.path.clone(),
                });
            }
            events.emit(HostEvent::TransferStarted {
                host: name(),
                remote: remote.clone(),
                local: mapped.path,
            });

            let connection_broken = match pull(session, &remote, pair) {
                TransferOutcome::Completed { local_path, bytes } => {
                    delete_failures.clear(&remote);
                    report.transferred += 1;
                    events.emit(HostEvent::TransferCompleted {
                        host: name(),
                        remote,
                        local: local_path,
                        bytes,
                    });
                    continue;
                }
                TransferOutcome::RemoteDeleteFailed {
                    local_path, error, ..
                } => {
                    let attempts = delete_failures.record(&remote);
                    report.transferred += 1;
                    let broken = error.is_connection_broken();
                    events.emit(HostEvent::RemoteDeleteFailed {
                        host: name(),
                        remote,
                        local: local_path,
                        error: error.to_string(),
                        attempts,
                        stuck: attempts >= settings.delete_retry_warn_after,
                    });
                    broken
                }
                TransferOutcome::Failed(TransferError::SizeMismatch { expected, copied }) => {
                    report.failed += 1;
                    events.emit(HostEvent::SizeMismatch {
                        host: name(),
                        remote,
                        expected,
                        copied,
                    });
                    false
                }
                TransferOutcome::Failed(e) => {
                    report.failed += 1;
                    let broken = e.is_connection_broken();
                    events.emit(HostEvent::TransferFailed {
                        host: name(),
                        remote,
                        error: e.to_string(),
                    });
                    broken
                }
            };

            // Something went wrong with this file; make sure it was not the connection.
            if connection_broken || !session.is_alive() {
                report.connection_lost = true;
                break 'pairs;
            }
        }
    }

    report
}
