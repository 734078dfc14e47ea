//! Stale session detection and cleanup.
//!
//! Handles session state left behind by hosts that died without cleaning up:
//! - Records whose host no longer answers
//! - Socket files with no record

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::Result;
use crate::session::{SessionStore, acquire, probe};

/// What a reconcile pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Servers whose records pointed at a dead host
    pub stale_records: Vec<String>,
    /// Socket files no record referred to
    pub orphan_sockets: Vec<PathBuf>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.stale_records.is_empty() && self.orphan_sockets.is_empty()
    }
}

/// Find records whose host does not answer
pub async fn find_stale_records(store: &SessionStore) -> Result<Vec<String>> {
    let mut stale = Vec::new();
    for record in store.list()? {
        if probe(&record).await.is_none() {
            stale.push(record.server);
        }
    }
    Ok(stale)
}

/// Socket files in `sockets_dir` with no matching record
pub fn find_orphan_sockets(store: &SessionStore, sockets_dir: &Path) -> Result<Vec<PathBuf>> {
    if !sockets_dir.exists() {
        return Ok(Vec::new());
    }

    let recorded: Vec<PathBuf> = store.list()?.into_iter().map(|r| r.socket_path).collect();
    let mut orphans = Vec::new();
    for entry in std::fs::read_dir(sockets_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sock") && !recorded.contains(&path) {
            orphans.push(path);
        }
    }
    orphans.sort();
    Ok(orphans)
}

/// Reconcile persisted records against live hosts.
///
/// Each removal happens under the server's record lock, and is re-checked
/// there, so a host that is still starting is left alone.
pub async fn reconcile(store: &SessionStore, sockets_dir: &Path) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for server in find_stale_records(store).await? {
        let _lock = acquire(store, &server).await?;
        let Some(record) = store.get(&server)? else {
            continue;
        };
        if probe(&record).await.is_some() {
            continue;
        }
        store.remove_if(&record.server, &record.id)?;
        remove_socket(&record.socket_path);
        report.stale_records.push(server);
    }

    for socket in find_orphan_sockets(store, sockets_dir)? {
        let Some(server) = socket.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let _lock = acquire(store, &server).await?;
        let claimed = store.get(&server)?.is_some_and(|r| r.socket_path == socket);
        if !claimed {
            remove_socket(&socket);
            report.orphan_sockets.push(socket);
        }
    }

    if !report.is_empty() {
        info!(
            "Recovered {} stale session(s) and {} orphan socket(s)",
            report.stale_records.len(),
            report.orphan_sockets.len()
        );
    }
    Ok(report)
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove socket {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionHandle, SessionRecord};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (SessionStore, PathBuf, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path().join("sessions")).unwrap();
        let sockets = temp.path().join("sockets");
        fs::create_dir_all(&sockets).unwrap();
        (store, sockets, temp)
    }

    fn record(server: &str, sockets: &Path) -> SessionRecord {
        let handle = SessionHandle {
            id: format!("ses-1-{}", server),
            server: server.to_string(),
            created_at: Utc::now(),
        };
        SessionRecord::new(&handle, u32::MAX, sockets.join(format!("{}.sock", server)))
    }

    #[tokio::test]
    async fn test_reconcile_empty() {
        let (store, sockets, _temp) = setup();
        let report = reconcile(&store, &sockets).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_removes_stale_record_and_socket() {
        let (store, sockets, _temp) = setup();
        let rec = record("chrome-devtools", &sockets);
        fs::write(&rec.socket_path, "").unwrap();
        store.put(&rec).unwrap();

        let report = reconcile(&store, &sockets).await.unwrap();
        assert_eq!(report.stale_records, vec!["chrome-devtools".to_string()]);
        assert!(store.get("chrome-devtools").unwrap().is_none());
        assert!(!rec.socket_path.exists());
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphan_socket() {
        let (store, sockets, _temp) = setup();
        let orphan = sockets.join("atlassian.sock");
        fs::write(&orphan, "").unwrap();
        fs::write(sockets.join("notes.txt"), "keep").unwrap();

        let report = reconcile(&store, &sockets).await.unwrap();
        assert_eq!(report.orphan_sockets, vec![orphan.clone()]);
        assert!(!orphan.exists());
        assert!(sockets.join("notes.txt").exists());
    }

    #[test]
    fn test_find_orphan_sockets_missing_dir() {
        let (store, sockets, _temp) = setup();
        assert!(find_orphan_sockets(&store, &sockets.join("nope")).unwrap().is_empty());
    }
}
