//! Persisted session records.
//!
//! One JSON file per server under `<state>/sessions/`, written atomically so
//! a reader never sees a half-written record. A sibling `.lock` file guards
//! record creation across processes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

use super::state::SessionHandle;
use crate::error::{Result, ToolshedError};

/// What survives a CLI process: enough to find the session host again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub server: String,
    /// Session host process
    pub pid: u32,
    /// Where the host listens
    pub socket_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub call_count: u64,
}

impl SessionRecord {
    pub fn new(handle: &SessionHandle, pid: u32, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            id: handle.id.clone(),
            server: handle.server.clone(),
            pid,
            socket_path: socket_path.into(),
            created_at: handle.created_at,
            last_activity: handle.created_at,
            call_count: 0,
        }
    }

    /// Note a completed call
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.call_count += 1;
    }
}

/// Exclusive advisory lock on a server's session record; released on drop
#[derive(Debug)]
pub struct RecordLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl RecordLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Session records on disk
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_path: PathBuf,
}

impl SessionStore {
    /// Create a store at the given directory, creating it if needed
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, server: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", server))
    }

    fn lock_path(&self, server: &str) -> PathBuf {
        self.base_path.join(format!("{}.lock", server))
    }

    /// Block until this process holds the server's record lock
    pub fn lock(&self, server: &str) -> Result<RecordLock> {
        let path = self.lock_path(server);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        let lock = loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(lock) => break lock,
                Err((returned, Errno::EINTR)) => file = returned,
                Err((_, errno)) => {
                    return Err(ToolshedError::Storage(format!(
                        "Failed to lock {}: {}",
                        path.display(),
                        errno
                    )));
                }
            }
        };
        debug!("Locked {}", path.display());
        Ok(RecordLock { _lock: lock, path })
    }

    /// Read a server's record, if any. An unreadable record is discarded.
    pub fn get(&self, server: &str) -> Result<Option<SessionRecord>> {
        let path = self.record_path(server);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding corrupt session record {}: {}", path.display(), e);
                self.remove(server)?;
                Ok(None)
            }
        }
    }

    /// Write a record via temp file + rename
    pub fn put(&self, record: &SessionRecord) -> Result<()> {
        let path = self.record_path(&record.server);
        let tmp = self.base_path.join(format!(".{}.json.tmp", record.server));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove a server's record. Missing records are fine.
    pub fn remove(&self, server: &str) -> Result<()> {
        match fs::remove_file(self.record_path(server)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a record only if it still belongs to session `id`
    pub fn remove_if(&self, server: &str, id: &str) -> Result<bool> {
        match self.get(server)? {
            Some(record) if record.id == id => {
                self.remove(server)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// All records, sorted by server
    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(server) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if server.starts_with('.') {
                continue;
            }
            if let Some(record) = self.get(server)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.server.cmp(&b.server));
        Ok(records)
    }
}
