use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One configured remote endpoint, validated and ready for a Host Monitor.
#[derive(Debug, Clone)]
pub struct HostDescriptor {
    /// Label used in logs and events. Defaults to the server address.
    pub name: String,
    pub server: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
    pub key_passphrase: Option<String>,
    pub host_identity: Option<HostIdentity>,
    pub directory_pairs: Vec<DirectoryPair>,
    pub interval: Duration,
}

impl HostDescriptor {
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// A remote subtree and the local subtree it is mirrored into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPair {
    pub remote_root: PathBuf,
    pub local_root: PathBuf,
}

impl DirectoryPair {
    pub fn new(remote_root: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
        }
    }
}

/// Pinned identity the server must present, already decoded.
#[derive(Clone, PartialEq, Eq)]
pub enum HostIdentity {
    /// Raw SSH public key blob.
    PublicKey(Vec<u8>),
    /// SHA-256 digest of the public key blob.
    Sha256(Vec<u8>),
}

impl fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostIdentity::PublicKey(blob) => write!(f, "PublicKey({} bytes)", blob.len()),
            HostIdentity::Sha256(digest) => write!(f, "Sha256({} bytes)", digest.len()),
        }
    }
}

/// Timing knobs shared by every Host Monitor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub quiescence: Duration,
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub keepalive: Duration,
    /// Consecutive remote-delete failures after which a file is reported as stuck.
    pub delete_retry_warn_after: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
            keepalive: Duration::from_secs(15),
            delete_retry_warn_after: 5,
        }
    }
}
