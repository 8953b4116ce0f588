use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while opening a connection to a host. All of them are retried by the monitor.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("Host identity mismatch for {host}: server presented a different key")]
    HostIdentityMismatch { host: String },

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
}

/// Failure enumerating one directory pair. Aborts that pair for the current cycle only.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to read remote clock: {0}")]
    RemoteClock(RemoteError),

    #[error("Failed to list {path}: {source}")]
    List { path: PathBuf, source: RemoteError },
}

impl DiscoveryError {
    pub fn is_connection_broken(&self) -> bool {
        match self {
            DiscoveryError::RemoteClock(e) => e.is_connection_broken(),
            DiscoveryError::List { source, .. } => source.is_connection_broken(),
        }
    }
}

/// Failure of a single file transfer. The remote file is never deleted when one of these occurs.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to open remote file {path}: {source}")]
    RemoteOpen { path: PathBuf, source: RemoteError },

    #[error("Failed to create local directory {path}: {source}")]
    LocalDir { path: PathBuf, source: io::Error },

    #[error("Failed to create local file {path}: {source}")]
    LocalCreate { path: PathBuf, source: io::Error },

    #[error("Stream failed after {copied} bytes: {source}")]
    Stream { copied: u64, source: io::Error },

    #[error("Size mismatch: remote reported {expected} bytes, copied {copied}")]
    SizeMismatch { expected: u64, copied: u64 },
}

impl TransferError {
    /// Whether the failure came from the connection rather than this one file
    pub fn is_connection_broken(&self) -> bool {
        match self {
            TransferError::RemoteOpen { source, .. } => source.is_connection_broken(),
            TransferError::Stream { source, .. } => io_kind_is_broken(source.kind()),
            _ => false,
        }
    }
}

// libssh2 session error codes that leave the session unusable.
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_CHANNEL_FAILURE: i32 = -21;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;
// SFTP status codes for a lost subsystem.
const LIBSSH2_FX_NO_CONNECTION: i32 = 6;
const LIBSSH2_FX_CONNECTION_LOST: i32 = 7;

/// Error reported by a remote session operation.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RemoteError {
    message: String,
    connection_broken: bool,
}

impl RemoteError {
    /// A failure scoped to one path or command
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_broken: false,
        }
    }

    /// A failure that leaves the session unusable
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_broken: true,
        }
    }

    pub fn is_connection_broken(&self) -> bool {
        self.connection_broken
    }
}

impl From<ssh2::Error> for RemoteError {
    fn from(err: ssh2::Error) -> Self {
        let broken = match err.code() {
            ssh2::ErrorCode::Session(code) => matches!(
                code,
                LIBSSH2_ERROR_SOCKET_SEND
                    | LIBSSH2_ERROR_TIMEOUT
                    | LIBSSH2_ERROR_SOCKET_DISCONNECT
                    | LIBSSH2_ERROR_CHANNEL_FAILURE
                    | LIBSSH2_ERROR_SOCKET_TIMEOUT
                    | LIBSSH2_ERROR_SOCKET_RECV
            ),
            ssh2::ErrorCode::SFTP(code) => {
                matches!(code, LIBSSH2_FX_NO_CONNECTION | LIBSSH2_FX_CONNECTION_LOST)
            }
        };
        Self {
            message: err.to_string(),
            connection_broken: broken,
        }
    }
}

impl From<io::Error> for RemoteError {
    fn from(err: io::Error) -> Self {
        Self {
            connection_broken: io_kind_is_broken(err.kind()),
            message: err.to_string(),
        }
    }
}

fn io_kind_is_broken(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}
