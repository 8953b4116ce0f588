use std::fs;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ssh2::{HashType, Session, Sftp};

use crate::error::{ConnectionError, RemoteError};
use crate::models::{HostDescriptor, HostIdentity, MonitorSettings};
use crate::sftp_logic::{Connector, EntryKind, RemoteEntry, RemoteFileHandle, RemoteSession};

/// Opens SSH sessions with public-key authentication and an SFTP subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl Connector for SshConnector {
    type Session = SshConnection;

    fn establish(
        &self,
        host: &HostDescriptor,
        settings: &MonitorSettings,
    ) -> Result<SshConnection, ConnectionError> {
        let key = load_private_key(&host.key_path, &host.user)?;

        tracing::debug!("Attempting to connect: {}@{}", host.user, host.address());
        let tcp = connect_tcp(host, settings.connect_timeout)?;

        let connect_err = |reason: String| ConnectionError::Connect {
            address: host.address(),
            reason,
        };

        let mut session = Session::new()
            .map_err(|_| connect_err("failed to create SSH session".to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(settings.io_timeout));
        session.handshake().map_err(|e| connect_err(e.to_string()))?;

        if let Some(expected) = &host.host_identity {
            let presented_key = session.host_key().map(|(blob, _)| blob);
            let presented_hash = session.host_key_hash(HashType::Sha256);
            if !identity_matches(expected, presented_key, presented_hash) {
                return Err(ConnectionError::HostIdentityMismatch {
                    host: host.address(),
                });
            }
        }

        session
            .userauth_pubkey_memory(&host.user, None, &key, host.key_passphrase.as_deref())
            .map_err(|e| ConnectionError::Auth {
                user: host.user.clone(),
                reason: e.to_string(),
            })?;
        if !session.authenticated() {
            return Err(ConnectionError::Auth {
                user: host.user.clone(),
                reason: "server rejected the key".to_string(),
            });
        }

        let keepalive = settings.keepalive.as_secs().clamp(1, u32::MAX as u64) as u32;
        session.set_keepalive(true, keepalive);

        let sftp = session
            .sftp()
            .map_err(|e| connect_err(format!("SFTP subsystem unavailable: {}", e)))?;

        Ok(SshConnection {
            session,
            sftp: Some(sftp),
        })
    }
}

/// Read the private key referenced by a host. Used at startup as well as on every connect.
pub fn load_private_key(path: &Path, user: &str) -> Result<String, ConnectionError> {
    let auth_err = |reason: String| ConnectionError::Auth {
        user: user.to_string(),
        reason,
    };

    let key = fs::read_to_string(path)
        .map_err(|e| auth_err(format!("cannot read key {}: {}", path.display(), e)))?;
    if !key.contains("PRIVATE KEY-----") {
        return Err(auth_err(format!(
            "{} does not contain a PEM or OpenSSH private key",
            path.display()
        )));
    }
    Ok(key)
}

fn connect_tcp(host: &HostDescriptor, timeout: Duration) -> Result<TcpStream, ConnectionError> {
    let connect_err = |reason: String| ConnectionError::Connect {
        address: host.address(),
        reason,
    };

    let addrs = (host.server.as_str(), host.port)
        .to_socket_addrs()
        .map_err(|e| connect_err(format!("cannot resolve: {}", e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(connect_err(match last_error {
        Some(e) => e.to_string(),
        None => "no addresses resolved".to_string(),
    }))
}

/// Compare the pinned identity with what the server presented, byte for byte.
fn identity_matches(
    expected: &HostIdentity,
    presented_key: Option<&[u8]>,
    presented_sha256: Option<&[u8]>,
) -> bool {
    match expected {
        HostIdentity::PublicKey(blob) => presented_key == Some(blob.as_slice()),
        HostIdentity::Sha256(digest) => presented_sha256 == Some(digest.as_slice()),
    }
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

/// Parse the output of `date +%s`
fn parse_epoch(output: &str) -> Result<SystemTime, RemoteError> {
    let secs: u64 = output.trim().parse().map_err(|_| {
        RemoteError::new(format!("unexpected remote clock output {:?}", output.trim()))
    })?;
    Ok(UNIX_EPOCH + Duration::from_secs(secs))
}

/// An authenticated SSH session to one host
pub struct SshConnection {
    session: Session,
    sftp: Option<Sftp>,
}

impl SshConnection {
    fn sftp(&self) -> Result<&Sftp, RemoteError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| RemoteError::connection_lost("connection closed"))
    }
}

impl RemoteSession for SshConnection {
    type Reader = ssh2::File;

    fn remote_time(&mut self) -> Result<SystemTime, RemoteError> {
        let mut channel = self.session.channel_session()?;
        channel.exec("date +%s")?;
        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.wait_close()?;

        let status = channel.exit_status()?;
        if status != 0 {
            return Err(RemoteError::new(format!("date exited with status {}", status)));
        }
        parse_epoch(&output)
    }

    fn read_dir(&mut self, dir: &Path) -> Result<Vec<RemoteEntry>, RemoteError> {
        let listing = self.sftp()?.readdir(dir)?;

        Ok(listing
            .into_iter()
            .map(|(path, stat)| {
                let file_type = stat.file_type();
                let kind = if file_type.is_dir() {
                    EntryKind::Directory
                } else if file_type.is_file() {
                    EntryKind::File
                } else {
                    EntryKind::Other
                };
                RemoteEntry {
                    path,
                    kind,
                    modified: stat.mtime.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
                }
            })
            .collect())
    }

    fn open(&mut self, path: &Path) -> Result<RemoteFileHandle<ssh2::File>, RemoteError> {
        let mut file = self.sftp()?.open(path)?;
        let size = file
            .stat()?
            .size
            .ok_or_else(|| RemoteError::new("server did not report a file size"))?;
        Ok(RemoteFileHandle { reader: file, size })
    }

    fn remove(&mut self, path: &Path) -> Result<(), RemoteError> {
        self.sftp()?.unlink(path)?;
        Ok(())
    }

    /// A full SFTP request and reply. Bounded by the session timeout.
    fn is_alive(&mut self) -> bool {
        match &self.sftp {
            Some(sftp) => sftp.realpath(Path::new(".")).is_ok(),
            None => false,
        }
    }

    fn close(&mut self) {
        if self.sftp.take().is_some() {
            let _ = self.session.disconnect(None, "sshpull closing", None);
        }
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.close();
    }
}
