//! Session client - the CLI side of cross-process sessions.
//!
//! Finds the session host for a server through its persisted record,
//! spawning a new host on `start`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::host;
use super::record::{RecordLock, SessionRecord, SessionStore};
use super::state::SessionHandle;
use crate::config::Config;
use crate::error::{Result, ToolshedError};
use crate::id::RequestIds;
use crate::ipc::{CallParams, HostReady, Methods};
use crate::value::StructuredValue;

/// How long a liveness probe may take
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a stopping host gets before the record is cleared anyway
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Extra time a host gets past its own call deadline to report back
const CALL_GRACE: Duration = Duration::from_secs(2);

/// Whether a process with this pid exists
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Ask a recorded host who it is. `None` unless it answers for this session.
pub async fn probe(record: &SessionRecord) -> Option<SessionHandle> {
    let ids = RequestIds::new();
    let response = tokio::time::timeout(
        PROBE_TIMEOUT,
        host::request(&record.socket_path, &ids, Methods::PING, Value::Null),
    )
    .await
    .ok()?
    .ok()?;
    let handle: SessionHandle = serde_json::from_value(response.result?).ok()?;
    (handle.id == record.id).then_some(handle)
}

/// Ask a recorded host process to exit, if it is still around
fn terminate(record: &SessionRecord) {
    if !process_alive(record.pid) {
        return;
    }
    if let Ok(pid) = i32::try_from(record.pid)
        && let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM)
    {
        debug!("SIGTERM to session host {} failed: {}", record.pid, e);
    }
}

/// Take a server's record lock without blocking the runtime
pub async fn acquire(store: &SessionStore, server: &str) -> Result<RecordLock> {
    let store = store.clone();
    let server = server.to_string();
    tokio::task::spawn_blocking(move || store.lock(&server))
        .await
        .map_err(|e| ToolshedError::Storage(format!("Lock task failed: {}", e)))?
}

/// How to launch a session host process
#[derive(Debug, Clone)]
pub struct HostLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl HostLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Launch hosts with the running executable
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Argument placed before `session serve <server>`
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self, server: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(["session", "serve", server])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // Own process group, so the CLI's terminal signals don't reach it
            .process_group(0);
        cmd
    }
}

/// A persisted session and whether its host answered
#[derive(Debug, Clone, Serialize)]
pub struct SessionListing {
    #[serde(flatten)]
    pub record: SessionRecord,
    pub alive: bool,
}

/// Starts, calls and stops sessions hosted by other processes
#[derive(Debug)]
pub struct SessionClient {
    store: SessionStore,
    sockets_dir: PathBuf,
    start_timeout: Duration,
    call_timeout: Duration,
    launcher: HostLauncher,
    ids: RequestIds,
}

impl SessionClient {
    pub fn new(config: &Config, launcher: HostLauncher) -> Result<Self> {
        Ok(Self {
            store: SessionStore::new(config.state.sessions_dir())?,
            sockets_dir: config.state.sockets_dir(),
            start_timeout: config.session.start_timeout(),
            call_timeout: config.session.call_timeout(),
            launcher,
            ids: RequestIds::new(),
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn sockets_dir(&self) -> &Path {
        &self.sockets_dir
    }

    /// Start a session, or return the one already running
    pub async fn start(&self, server: &str) -> Result<SessionHandle> {
        let _lock = acquire(&self.store, server).await?;

        if let Some(record) = self.store.get(server)? {
            if let Some(handle) = probe(&record).await {
                debug!("Session {} for {} already running", handle.id, server);
                return Ok(handle);
            }
            warn!("Discarding stale session record for {}", server);
            self.discard(&record)?;
        }

        self.spawn_host(server).await
    }

    async fn spawn_host(&self, server: &str) -> Result<SessionHandle> {
        let failed = |reason: String| ToolshedError::SessionStartFailed {
            server: server.to_string(),
            reason,
        };

        let mut child = self
            .launcher
            .command(server)
            .spawn()
            .map_err(|e| failed(format!("failed to launch session host: {}", e)))?;
        let stdout = child.stdout.take().ok_or_else(|| failed("session host has no stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let line = match tokio::time::timeout(self.start_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => Err(failed("session host exited before becoming ready".to_string())),
            Ok(Err(e)) => Err(failed(format!("failed to read from session host: {}", e))),
            Err(_) => Err(failed(format!(
                "session host not ready after {}ms",
                self.start_timeout.as_millis()
            ))),
        };
        let ready = line.and_then(|line| {
            serde_json::from_str::<HostReady>(&line).map_err(|e| failed(format!("bad readiness line: {}", e)))
        });

        match ready {
            Ok(HostReady {
                session: Some(handle), ..
            }) => {
                info!("Session {} started for {} (pid {:?})", handle.id, server, child.id());
                Ok(handle)
            }
            Ok(HostReady { error, .. }) => {
                let _ = tokio::time::timeout(STOP_GRACE, child.wait()).await;
                Err(error
                    .map(|e| e.into_error(server, None))
                    .unwrap_or_else(|| failed("session host gave no handle".to_string())))
            }
            Err(e) => {
                if let Err(kill_err) = child.start_kill() {
                    debug!("Kill of session host for {} skipped: {}", server, kill_err);
                }
                let _ = child.wait().await;
                Err(e)
            }
        }
    }

    /// Call a tool through the server's session host. Never starts one.
    pub async fn call(&self, server: &str, tool: &str, params: &StructuredValue) -> Result<StructuredValue> {
        let Some(record) = self.store.get(server)? else {
            return Err(ToolshedError::NoActiveSession(server.to_string()));
        };

        let params = serde_json::to_value(CallParams {
            tool: tool.to_string(),
            params: params.clone(),
        })?;

        let deadline = self.call_timeout + CALL_GRACE;
        let request = host::request(&record.socket_path, &self.ids, Methods::CALL, params);
        let reason = match tokio::time::timeout(deadline, request).await {
            Ok(Ok(response)) => {
                return match response.error {
                    Some(error) => Err(error.into_error(server, Some(tool))),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
            }
            Ok(Err(e)) => {
                warn!("Session host for {} unreachable: {}", server, e);
                e.detail()
            }
            Err(_) => {
                warn!("Session host for {} gave no answer within {}ms", server, deadline.as_millis());
                terminate(&record);
                format!("session host did not answer within {}ms", deadline.as_millis())
            }
        };

        self.discard(&record)?;
        Err(ToolshedError::SessionDied {
            server: server.to_string(),
            reason,
        })
    }

    /// Stop the server's session. Returns whether one was running.
    pub async fn stop(&self, server: &str) -> Result<bool> {
        let _lock = acquire(&self.store, server).await?;
        let Some(record) = self.store.get(server)? else {
            return Ok(false);
        };

        match host::request(&record.socket_path, &self.ids, Methods::STOP, Value::Null).await {
            Ok(response) => {
                if let Some(error) = response.error {
                    warn!("Session host for {} reported: {}", server, error.message);
                }
                self.wait_for_exit(&record).await;
                self.discard(&record)?;
                Ok(true)
            }
            Err(e) => {
                debug!("Session host for {} unreachable on stop: {}", server, e);
                terminate(&record);
                self.discard(&record)?;
                Ok(false)
            }
        }
    }

    async fn wait_for_exit(&self, record: &SessionRecord) {
        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while record.socket_path.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// All persisted sessions with liveness
    pub async fn list(&self) -> Result<Vec<SessionListing>> {
        let mut listings = Vec::new();
        for record in self.store.list()? {
            let alive = probe(&record).await.is_some();
            listings.push(SessionListing { record, alive });
        }
        Ok(listings)
    }

    /// Forget a session whose host is gone or going
    fn discard(&self, record: &SessionRecord) -> Result<()> {
        self.store.remove_if(&record.server, &record.id)?;
        if let Err(e) = std::fs::remove_file(&record.socket_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove socket {}: {}", record.socket_path.display(), e);
        }
        Ok(())
    }
}
