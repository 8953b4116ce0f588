use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{ConnectionError, RemoteError};
use crate::models::{HostDescriptor, MonitorSettings};

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Symlinks, sockets, devices. Never transferred or descended into.
    Other,
}

/// One entry returned by a remote directory listing
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
}

/// An open remote file together with the size reported when it was opened.
/// Only valid for one transfer attempt.
pub struct RemoteFileHandle<R> {
    pub reader: R,
    pub size: u64,
}

/// A live, authenticated channel to one host.
///
/// Implementations are blocking; the monitor drives them from a blocking task.
pub trait RemoteSession: Send + 'static {
    type Reader: Read;

    /// Current time according to the remote host
    fn remote_time(&mut self) -> Result<SystemTime, RemoteError>;

    /// List the direct children of `dir`, without `.` and `..`
    fn read_dir(&mut self, dir: &Path) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Open a remote file for sequential reading
    fn open(&mut self, path: &Path) -> Result<RemoteFileHandle<Self::Reader>, RemoteError>;

    /// Delete a remote file
    fn remove(&mut self, path: &Path) -> Result<(), RemoteError>;

    /// Probe whether the underlying connection still works
    fn is_alive(&mut self) -> bool;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self);
}

/// Opens sessions for a host. Never retries on its own.
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteSession;

    fn establish(
        &self,
        host: &HostDescriptor,
        settings: &MonitorSettings,
    ) -> Result<Self::Session, ConnectionError>;
}
