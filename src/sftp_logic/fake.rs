//! In-memory remote host used by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use super::types::{Connector, EntryKind, RemoteEntry, RemoteFileHandle, RemoteSession};
use crate::error::{ConnectionError, RemoteError};
use crate::models::{HostDescriptor, MonitorSettings};

#[derive(Debug, Clone)]
struct FakeFile {
    data: Vec<u8>,
    modified: SystemTime,
    reported_size: Option<u64>,
    fail_after: Option<usize>,
}

#[derive(Debug)]
struct FakeState {
    now: SystemTime,
    files: BTreeMap<PathBuf, FakeFile>,
    dirs: BTreeSet<PathBuf>,
    links: BTreeSet<PathBuf>,
    unlistable: BTreeSet<PathBuf>,
    unopenable: BTreeSet<PathBuf>,
    stalled_dirs: BTreeSet<PathBuf>,
    refuse_connect: bool,
    clock_broken: bool,
    delete_fails: bool,
    broken: bool,
    stalled: bool,
    connects: usize,
    closes: usize,
    opens: usize,
}

/// Shared handle to a fake remote filesystem
#[derive(Debug, Clone)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                now: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                links: BTreeSet::new(),
                unlistable: BTreeSet::new(),
                unopenable: BTreeSet::new(),
                stalled_dirs: BTreeSet::new(),
                refuse_connect: false,
                clock_broken: false,
                delete_fails: false,
                broken: false,
                stalled: false,
                connects: 0,
                closes: 0,
                opens: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.lock();
        let mut current = Some(Path::new(path));
        while let Some(dir) = current {
            state.dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }

    /// Add a file last modified `age` before the fake remote clock
    pub fn add_file(&self, path: &str, data: &[u8], age: Duration) {
        if let Some(parent) = Path::new(path).parent() {
            self.add_dir(&parent.to_string_lossy());
        }
        let mut state = self.lock();
        let modified = state.now - age;
        state.files.insert(
            PathBuf::from(path),
            FakeFile {
                data: data.to_vec(),
                modified,
                reported_size: None,
                fail_after: None,
            },
        );
    }

    pub fn add_symlink(&self, path: &str) {
        if let Some(parent) = Path::new(path).parent() {
            self.add_dir(&parent.to_string_lossy());
        }
        self.lock().links.insert(PathBuf::from(path));
    }

    /// Make the remote report a size that differs from the bytes it will serve
    pub fn set_reported_size(&self, path: &str, size: u64) {
        if let Some(file) = self.lock().files.get_mut(Path::new(path)) {
            file.reported_size = Some(size);
        }
    }

    /// Make reads of `path` fail once `bytes` have been served
    pub fn fail_stream_after(&self, path: &str, bytes: usize) {
        if let Some(file) = self.lock().files.get_mut(Path::new(path)) {
            file.fail_after = Some(bytes);
        }
    }

    pub fn heal_stream(&self, path: &str) {
        if let Some(file) = self.lock().files.get_mut(Path::new(path)) {
            file.fail_after = None;
        }
    }

    pub fn make_unlistable(&self, path: &str) {
        self.lock().unlistable.insert(PathBuf::from(path));
    }

    pub fn make_unopenable(&self, path: &str) {
        self.lock().unopenable.insert(PathBuf::from(path));
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    pub fn set_clock_broken(&self, broken: bool) {
        self.lock().clock_broken = broken;
    }

    pub fn set_delete_fails(&self, fails: bool) {
        self.lock().delete_fails = fails;
    }

    /// Break every open session; new sessions work again
    pub fn break_connection(&self) {
        self.lock().broken = true;
    }

    /// Requests time out while the server still answers probes. New sessions work again.
    pub fn stall(&self) {
        self.lock().stalled = true;
    }

    /// Listing `path` times out at the session level
    pub fn stall_listing(&self, path: &str) {
        self.lock().stalled_dirs.insert(PathBuf::from(path));
    }

    /// Delete a file behind the monitor's back
    pub fn remove_file(&self, path: &str) {
        self.lock().files.remove(Path::new(path));
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().files.contains_key(Path::new(path))
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            remote: self.clone(),
        }
    }

    pub fn session(&self) -> FakeSession {
        self.lock().connects += 1;
        FakeSession {
            remote: self.clone(),
            generation_broken: false,
            closed: false,
        }
    }
}

pub struct FakeConnector {
    remote: FakeRemote,
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    fn establish(
        &self,
        host: &HostDescriptor,
        _settings: &MonitorSettings,
    ) -> Result<FakeSession, ConnectionError> {
        {
            let mut state = self.remote.lock();
            if state.refuse_connect {
                return Err(ConnectionError::Connect {
                    address: host.address(),
                    reason: "connection refused".to_string(),
                });
            }
            state.broken = false;
            state.stalled = false;
        }
        Ok(self.remote.session())
    }
}

pub struct FakeSession {
    remote: FakeRemote,
    generation_broken: bool,
    closed: bool,
}

impl FakeSession {
    fn refresh(&mut self) {
        if self.closed || self.remote.lock().broken {
            self.generation_broken = true;
        }
    }

    fn check(&mut self) -> Result<(), RemoteError> {
        self.refresh();
        if self.generation_broken {
            // Unclassified: only the liveness probe notices.
            return Err(RemoteError::new("connection lost"));
        }
        if self.remote.lock().stalled {
            return Err(RemoteError::connection_lost("timed out waiting for the server"));
        }
        Ok(())
    }
}

impl RemoteSession for FakeSession {
    type Reader = FakeReader;

    fn remote_time(&mut self) -> Result<SystemTime, RemoteError> {
        self.check()?;
        let state = self.remote.lock();
        if state.clock_broken {
            return Err(RemoteError::new("date: command not found"));
        }
        Ok(state.now)
    }

    fn read_dir(&mut self, dir: &Path) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.check()?;
        let state = self.remote.lock();
        if state.stalled_dirs.contains(dir) {
            return Err(RemoteError::connection_lost("timed out waiting for the server"));
        }
        if state.unlistable.contains(dir) || !state.dirs.contains(dir) {
            return Err(RemoteError::new(format!("{}: no such directory", dir.display())));
        }

        let is_child = |path: &Path| path.parent() == Some(dir);
        let mut entries = Vec::new();
        for child in state.dirs.iter().filter(|d| is_child(d)) {
            entries.push(RemoteEntry {
                path: child.clone(),
                kind: EntryKind::Directory,
                modified: Some(state.now),
            });
        }
        for (path, file) in state.files.iter().filter(|(p, _)| is_child(p)) {
            entries.push(RemoteEntry {
                path: path.clone(),
                kind: EntryKind::File,
                modified: Some(file.modified),
            });
        }
        for link in state.links.iter().filter(|l| is_child(l)) {
            entries.push(RemoteEntry {
                path: link.clone(),
                kind: EntryKind::Other,
                modified: Some(state.now - Duration::from_secs(3600)),
            });
        }
        Ok(entries)
    }

    fn open(&mut self, path: &Path) -> Result<RemoteFileHandle<FakeReader>, RemoteError> {
        self.check()?;
        let mut state = self.remote.lock();
        state.opens += 1;
        if state.unopenable.contains(path) {
            return Err(RemoteError::new("permission denied"));
        }
        let file = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::new("no such file"))?;
        Ok(RemoteFileHandle {
            size: file.reported_size.unwrap_or(file.data.len() as u64),
            reader: FakeReader {
                data: file.data,
                pos: 0,
                fail_after: file.fail_after,
            },
        })
    }

    fn remove(&mut self, path: &Path) -> Result<(), RemoteError> {
        self.check()?;
        let mut state = self.remote.lock();
        if state.delete_fails {
            return Err(RemoteError::new("permission denied"));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::new("no such file"))
    }

    fn is_alive(&mut self) -> bool {
        self.refresh();
        !self.generation_broken
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.remote.lock().closes += 1;
        }
    }
}

pub struct FakeReader {
    data: Vec<u8>,
    pos: usize,
    fail_after: Option<usize>,
}

impl Read for FakeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.fail_after.unwrap_or(self.data.len()).min(self.data.len());
        if self.pos >= limit {
            if self.fail_after.is_some() && self.pos < self.data.len() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "channel closed"));
            }
            return Ok(0);
        }
        // Small chunks so streaming goes through several reads.
        let n = buf.len().min(limit - self.pos).min(256);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
