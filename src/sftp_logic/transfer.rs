use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::local::map_to_local;
use super::types::RemoteSession;
use crate::error::{RemoteError, TransferError};
use crate::models::DirectoryPair;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of one attempt to pull a remote file
#[derive(Debug)]
pub enum TransferOutcome {
    /// Every byte arrived and the remote file was deleted
    Completed { local_path: PathBuf, bytes: u64 },
    /// Every byte arrived but the remote file could not be deleted
    RemoteDeleteFailed {
        local_path: PathBuf,
        bytes: u64,
        error: RemoteError,
    },
    /// Nothing was deleted on the remote side
    Failed(TransferError),
}

/// Download `remote_file` into the local tree of `pair` and delete it remotely once the byte
/// count matches the size reported at open time.
///
/// A failed attempt leaves the remote file alone and any partial local file on disk; the next
/// attempt overwrites it.
pub fn pull<S: RemoteSession>(
    session: &mut S,
    remote_file: &Path,
    pair: &DirectoryPair,
) -> TransferOutcome {
    let (local_path, bytes) = match download(session, remote_file, pair) {
        Ok(done) => done,
        Err(e) => return TransferOutcome::Failed(e),
    };

    match session.remove(remote_file) {
        Ok(()) => TransferOutcome::Completed { local_path, bytes },
        Err(error) => TransferOutcome::RemoteDeleteFailed {
            local_path,
            bytes,
            error,
        },
    }
}

/// Copy the remote file locally and verify its size. Returns the local path and byte count.
fn download<S: RemoteSession>(
    session: &mut S,
    remote_file: &Path,
    pair: &DirectoryPair,
) -> Result<(PathBuf, u64), TransferError> {
    let mut handle = session
        .open(remote_file)
        .map_err(|source| TransferError::RemoteOpen {
            path: remote_file.to_path_buf(),
            source,
        })?;
    let expected = handle.size;

    let local_path = map_to_local(remote_file, pair).path;
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent).map_err(|source| TransferError::LocalDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut local = File::create(&local_path).map_err(|source| TransferError::LocalCreate {
        path: local_path.clone(),
        source,
    })?;

    let copied = copy_counted(&mut handle.reader, &mut local)?;

    if copied != expected {
        return Err(TransferError::SizeMismatch { expected, copied });
    }

    Ok((local_path, copied))
}

/// Stream everything from `reader` into `writer`, keeping the count of bytes written even
/// when the stream breaks.
fn copy_counted<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<u64, TransferError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(TransferError::Stream { copied, source }),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|source| TransferError::Stream { copied, source })?;
        copied += n as u64;
    }

    writer
        .flush()
        .map_err(|source| TransferError::Stream { copied, source })?;
    Ok(copied)
}
