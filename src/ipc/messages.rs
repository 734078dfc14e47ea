//! IPC message types for CLI ↔ session host communication.
//!
//! Uses JSON Lines (newline-delimited JSON) over a Unix stream socket.
//! Field names follow JSON-RPC (id, method, params, result, error), but
//! there is no version field, batching or notification support.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, ToolshedError};
use crate::session::SessionHandle;

/// Request sent from a CLI process to a session host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Unique request ID for correlating responses.
    pub id: u64,
    /// Method name, one of [`Methods`].
    pub method: String,
    /// Method parameters as JSON value.
    #[serde(default)]
    pub params: Value,
}

impl SessionRequest {
    /// Create a new request with the given method and params.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters.
    pub fn no_params(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }
}

/// Parameters of a `session.call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

/// Response sent from a session host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Request ID this response corresponds to.
    pub id: u64,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error details on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl SessionResponse {
    /// Create a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: u64, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response indicates success.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A `ToolshedError` flattened for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    /// Variable part of the message (see `ToolshedError::detail`)
    pub message: String,
    /// Remote tool output, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
            timeout_ms: None,
        }
    }

    /// Rebuild the typed error on the receiving side.
    ///
    /// `server` and `tool` are what the receiver asked for; kinds that carry
    /// them are reconstructed from the request rather than the message.
    pub fn into_error(self, server: &str, tool: Option<&str>) -> ToolshedError {
        let tool_name = tool.unwrap_or_default().to_string();
        match self.kind {
            ErrorKind::CatalogueMissing => ToolshedError::CatalogueMissing(self.message.into()),
            ErrorKind::UnknownServer => ToolshedError::UnknownServer(self.message),
            ErrorKind::UnknownTool => ToolshedError::UnknownTool {
                server: server.to_string(),
                tool: self.message,
            },
            ErrorKind::MalformedParameters => ToolshedError::MalformedParameters(self.message),
            ErrorKind::ParameterSourceUnavailable => ToolshedError::ParameterSourceUnavailable(self.message),
            ErrorKind::TransportUnavailable => ToolshedError::TransportUnavailable {
                server: server.to_string(),
                reason: self.message,
            },
            ErrorKind::RemoteToolError => ToolshedError::RemoteToolError {
                server: server.to_string(),
                tool: tool_name,
                message: self.message,
                payload: self.payload,
            },
            ErrorKind::Timeout => ToolshedError::Timeout {
                target: self.message,
                timeout_ms: self.timeout_ms.unwrap_or_default(),
            },
            ErrorKind::NoActiveSession => ToolshedError::NoActiveSession(server.to_string()),
            ErrorKind::SessionStartFailed => ToolshedError::SessionStartFailed {
                server: server.to_string(),
                reason: self.message,
            },
            ErrorKind::SessionDied => ToolshedError::SessionDied {
                server: server.to_string(),
                reason: self.message,
            },
            ErrorKind::SessionBusy => ToolshedError::SessionBusy(server.to_string()),
            ErrorKind::Catalogue => ToolshedError::Catalogue(self.message),
            ErrorKind::Storage => ToolshedError::Storage(self.message),
            ErrorKind::Ipc | ErrorKind::Io | ErrorKind::Json => ToolshedError::Ipc(self.message),
        }
    }
}

impl From<&ToolshedError> for WireError {
    fn from(err: &ToolshedError) -> Self {
        Self {
            kind: err.kind(),
            message: err.detail(),
            payload: err.payload().cloned(),
            timeout_ms: match err {
                ToolshedError::Timeout { timeout_ms, .. } => Some(*timeout_ms),
                _ => None,
            },
        }
    }
}

/// First line a session host writes to stdout once it is serving, or has
/// given up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReady {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Known method names as constants.
pub struct Methods;

impl Methods {
    pub const PING: &'static str = "session.ping";
    pub const CALL: &'static str = "session.call";
    pub const STOP: &'static str = "session.stop";
}
