//! Session host - keeps one server's session alive between CLI processes
//!
//! Provides:
//! - Unix socket listener speaking newline-delimited JSON
//! - Request routing to the session manager
//! - Shutdown on stop request, idle timeout, session death or signal

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use super::manager::SessionManager;
use crate::error::{Result, ToolshedError};
use crate::id::RequestIds;
use crate::ipc::{CallParams, HostReady, Methods, NdJsonCodec, SessionRequest, SessionResponse, WireError};

/// How often idle sessions are looked for
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Why the host stopped serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    Stopped,
    Idle,
    SessionEnded,
    Signal,
}

/// Serves one server's session over a Unix socket
pub struct SessionHost {
    server: String,
    manager: Arc<SessionManager>,
    socket_path: PathBuf,
    idle_check: Duration,
}

impl SessionHost {
    pub fn new(server: impl Into<String>, manager: Arc<SessionManager>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            server: server.into(),
            manager,
            socket_path: socket_path.into(),
            idle_check: IDLE_CHECK_INTERVAL,
        }
    }

    /// Check for idle sessions at a different interval
    pub fn with_idle_check(mut self, interval: Duration) -> Self {
        self.idle_check = interval;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, returning the listener and the socket file's inode
    fn bind(&self) -> Result<(UnixListener, u64)> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| ToolshedError::Ipc(format!("Failed to bind {}: {}", self.socket_path.display(), e)))?;
        let inode = std::fs::metadata(&self.socket_path)?.ino();
        Ok((listener, inode))
    }

    /// Remove the socket file unless a newer host has bound the same path
    fn remove_socket(&self, inode: u64) {
        match std::fs::metadata(&self.socket_path) {
            Ok(meta) if meta.ino() == inode => {
                if let Err(e) = std::fs::remove_file(&self.socket_path) {
                    warn!("Failed to remove socket {}: {}", self.socket_path.display(), e);
                }
            }
            Ok(_) => debug!("Socket {} taken over by another host", self.socket_path.display()),
            Err(_) => {}
        }
    }

    /// Start the session, report readiness, then serve until told to stop.
    ///
    /// `ready` receives the session handle once requests can be accepted, or
    /// the error that prevented it.
    pub async fn run(self, ready: oneshot::Sender<HostReady>) -> Result<HostExit> {
        let (listener, inode) = match self.bind() {
            Ok(bound) => bound,
            Err(e) => {
                let _ = ready.send(HostReady {
                    session: None,
                    error: Some(WireError::from(&e)),
                });
                return Err(e);
            }
        };

        let handle = match self.manager.start(&self.server).await {
            Ok(handle) => handle,
            Err(e) => {
                self.remove_socket(inode);
                let _ = ready.send(HostReady {
                    session: None,
                    error: Some(WireError::from(&e)),
                });
                return Err(e);
            }
        };
        info!("Serving session {} for {} on {}", handle.id, self.server, self.socket_path.display());
        let _ = ready.send(HostReady {
            session: Some(handle),
            error: None,
        });

        let exit = self.serve(listener).await;

        self.manager.shutdown().await;
        self.remove_socket(inode);
        info!("Session host for {} exiting: {:?}", self.server, exit);
        Ok(exit)
    }

    async fn serve(&self, listener: UnixListener) -> HostExit {
        let (exit_tx, mut exit_rx) = mpsc::channel::<HostExit>(4);
        let mut idle = tokio::time::interval(self.idle_check);
        idle.tick().await;

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                warn!("Cannot watch SIGTERM: {}", e);
                None
            }
        };

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let server = self.server.clone();
                            let manager = Arc::clone(&self.manager);
                            let exit_tx = exit_tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, &server, &manager, &exit_tx).await {
                                    debug!("Client connection ended: {}", e);
                                }
                            });
                        }
                        Err(e) => warn!("Accept error: {}", e),
                    }
                }
                Some(exit) = exit_rx.recv() => return exit,
                _ = idle.tick() => {
                    if !self.manager.reap_idle().await.is_empty() {
                        return HostExit::Idle;
                    }
                }
                _ = tokio::signal::ctrl_c() => return HostExit::Signal,
                _ = async {
                    match sigterm.as_mut() {
                        Some(sigterm) => { sigterm.recv().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => return HostExit::Signal,
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(
    stream: UnixStream,
    server: &str,
    manager: &SessionManager,
    exit_tx: &mpsc::Sender<HostExit>,
) -> Result<()> {
    let mut framed = Framed::new(stream, NdJsonCodec::<SessionRequest>::new());

    while let Some(frame) = framed.next().await {
        let (response, exit) = match frame {
            Ok(request) => dispatch(server, manager, request).await,
            Err(e) => (
                SessionResponse::error(0, WireError::new(crate::error::ErrorKind::Ipc, format!("Parse error: {}", e))),
                None,
            ),
        };

        framed
            .send(response)
            .await
            .map_err(|e| ToolshedError::Ipc(format!("Failed to write response: {}", e)))?;

        if let Some(exit) = exit {
            let _ = exit_tx.send(exit).await;
            break;
        }
    }
    Ok(())
}

/// Route one request to the manager
async fn dispatch(
    server: &str,
    manager: &SessionManager,
    request: SessionRequest,
) -> (SessionResponse, Option<HostExit>) {
    match request.method.as_str() {
        Methods::PING => {
            // A dead session ends the host so the next start spawns a fresh one
            match manager.live_handle(server).await {
                Some(handle) => (SessionResponse::success(request.id, json!(handle)), None),
                None => {
                    let err = ToolshedError::NoActiveSession(server.to_string());
                    (SessionResponse::error(request.id, WireError::from(&err)), Some(HostExit::SessionEnded))
                }
            }
        }
        Methods::CALL => {
            let params: CallParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => {
                    let err = ToolshedError::Ipc(format!("Invalid call params: {}", e));
                    return (SessionResponse::error(request.id, WireError::from(&err)), None);
                }
            };
            let result = manager.call(server, &params.tool, &params.params).await;
            // A call that kills the session ends the host with it
            let exit = (!manager.state(server).is_active()).then_some(HostExit::SessionEnded);
            match result {
                Ok(value) => (SessionResponse::success(request.id, value), exit),
                Err(e) => (SessionResponse::error(request.id, WireError::from(&e)), exit),
            }
        }
        Methods::STOP => match manager.stop(server).await {
            Ok(stopped) => (
                SessionResponse::success(request.id, json!({"stopped": stopped})),
                Some(HostExit::Stopped),
            ),
            Err(e) => (SessionResponse::error(request.id, WireError::from(&e)), Some(HostExit::Stopped)),
        },
        other => {
            let err = ToolshedError::Ipc(format!("Unknown method: {}", other));
            (SessionResponse::error(request.id, WireError::from(&err)), None)
        }
    }
}

/// Send one request to a host and wait for its response
pub async fn request(
    socket_path: &Path,
    ids: &RequestIds,
    method: &str,
    params: serde_json::Value,
) -> Result<SessionResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| ToolshedError::Ipc(format!("Failed to connect to {}: {}", socket_path.display(), e)))?;
    let mut framed = Framed::new(stream, NdJsonCodec::<SessionResponse>::new());

    let request = SessionRequest::new(ids.next_id(), method, params);
    let id = request.id;
    framed
        .send(request)
        .await
        .map_err(|e| ToolshedError::Ipc(format!("Failed to send request: {}", e)))?;

    match framed.next().await {
        Some(Ok(response)) if response.id == id => Ok(response),
        Some(Ok(response)) => Err(ToolshedError::Ipc(format!(
            "Response id mismatch: expected {}, got {}",
            id, response.id
        ))),
        Some(Err(e)) => Err(ToolshedError::Ipc(format!("Failed to read response: {}", e))),
        None => Err(ToolshedError::Ipc("Connection closed before response".to_string())),
    }
}
