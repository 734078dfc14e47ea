//! Stdio transport: a child process speaking newline-delimited JSON-RPC

use std::fmt::Display;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::Transport;
use super::rpc::{self, RpcMessage, RpcRequest};
use crate::catalogue::TransportConfig;
use crate::error::{Result, ToolshedError};
use crate::id::RequestIds;
use crate::ipc::NdJsonCodec;
use crate::value::StructuredValue;

/// How long a killed server gets to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

fn unavailable(server: &str, reason: impl Display) -> ToolshedError {
    ToolshedError::TransportUnavailable {
        server: server.to_string(),
        reason: reason.to_string(),
    }
}

/// Connection to a tool server running as a child process
pub struct StdioTransport {
    server: String,
    child: Child,
    writer: FramedWrite<ChildStdin, NdJsonCodec<RpcMessage>>,
    reader: FramedRead<ChildStdout, NdJsonCodec<RpcMessage>>,
    ids: RequestIds,
    closed: bool,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server", &self.server)
            .field("pid", &self.child.id())
            .field("closed", &self.closed)
            .finish()
    }
}

impl StdioTransport {
    /// Spawn the server and complete the MCP handshake
    pub async fn connect(server: &str, config: &TransportConfig) -> Result<Self> {
        let TransportConfig::Stdio { command, args, env, cwd } = config else {
            return Err(unavailable(server, format!("not a stdio transport: {}", config.kind())));
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| unavailable(server, format!("failed to spawn {}: {}", command, e)))?;
        debug!("Spawned {} for {} (pid {:?})", command, server, child.id());

        let stdin = child.stdin.take().ok_or_else(|| unavailable(server, "missing child stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| unavailable(server, "missing child stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            let name = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] {}", name, line);
                }
            });
        }

        let mut transport = Self {
            server: server.to_string(),
            child,
            writer: FramedWrite::new(stdin, NdJsonCodec::new()),
            reader: FramedRead::new(stdout, NdJsonCodec::new().skipping_invalid()),
            ids: RequestIds::new(),
            closed: false,
        };
        transport.handshake().await?;
        Ok(transport)
    }

    async fn handshake(&mut self) -> Result<()> {
        let id = self.ids.next_id();
        let response = self.round_trip(RpcRequest::initialize(id), id).await?;
        rpc::check_initialized(&self.server, &response)?;
        self.send(RpcRequest::notification(rpc::Methods::INITIALIZED)).await?;
        debug!("Handshake with {} complete", self.server);
        Ok(())
    }

    async fn send<T: Serialize + Send>(&mut self, message: T) -> Result<()> {
        self.writer
            .send(message)
            .await
            .map_err(|e| unavailable(&self.server, format!("write failed: {}", e)))
    }

    /// Send a request and read until its response, answering any requests
    /// the server makes in the meantime.
    async fn round_trip(&mut self, request: RpcRequest, id: u64) -> Result<RpcMessage> {
        self.send(request).await?;
        loop {
            let message = match self.reader.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(unavailable(&self.server, format!("read failed: {}", e))),
                None => return Err(unavailable(&self.server, "server closed its output")),
            };

            if message.is_response_to(id) {
                return Ok(message);
            }
            if message.is_server_request() {
                if let Some(reply) = message.reply() {
                    self.send(reply).await?;
                }
                continue;
            }
            debug!("Ignoring message from {}: {:?}", self.server, message.method);
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn call_tool(&mut self, method: &str, params: &StructuredValue) -> Result<StructuredValue> {
        if self.closed {
            return Err(unavailable(&self.server, "transport closed"));
        }
        let id = self.ids.next_id();
        let response = self.round_trip(RpcRequest::tools_call(id, method, params), id).await?;
        rpc::tool_outcome(&self.server, method, response)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.child.start_kill() {
            // Already exited
            debug!("Kill {} skipped: {}", self.server, e);
        }
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {}", self.server, status),
            Ok(Err(e)) => warn!("Failed to reap {}: {}", self.server, e),
            Err(_) => warn!("{} did not exit within {:?}", self.server, REAP_TIMEOUT),
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.closed && matches!(self.child.try_wait(), Ok(None))
    }
}
