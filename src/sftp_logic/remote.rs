use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::types::{EntryKind, RemoteSession};
use crate::error::DiscoveryError;

/// A file is settled once its last modification is strictly older than `now - quiescence`.
pub fn is_settled(modified: SystemTime, now: SystemTime, quiescence: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age > quiescence,
        // Modified "in the future" relative to the remote clock
        Err(_) => false,
    }
}

/// Recursively list regular files under `remote_root` that have not been modified for at
/// least `quiescence`, judged by the remote host's clock.
///
/// The order of the returned paths is not meaningful.
pub fn list_settled_files<S: RemoteSession>(
    session: &mut S,
    remote_root: &Path,
    quiescence: Duration,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let now = session
        .remote_time()
        .map_err(DiscoveryError::RemoteClock)?;

    let root_entries = session
        .read_dir(remote_root)
        .map_err(|source| DiscoveryError::List {
            path: remote_root.to_path_buf(),
            source,
        })?;

    let mut settled = Vec::new();
    let mut pending = vec![root_entries];

    while let Some(entries) = pending.pop() {
        for entry in entries {
            match entry.kind {
                EntryKind::File => {
                    if entry
                        .modified
                        .is_some_and(|modified| is_settled(modified, now, quiescence))
                    {
                        settled.push(entry.path);
                    }
                }
                EntryKind::Directory => match session.read_dir(&entry.path) {
                    Ok(children) => pending.push(children),
                    Err(source) if source.is_connection_broken() => {
                        return Err(DiscoveryError::List {
                            path: entry.path,
                            source,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Skipping remote directory {}: {}",
                            entry.path.display(),
                            e
                        );
                    }
                },
                EntryKind::Other => {}
            }
        }
    }

    Ok(settled)
}
