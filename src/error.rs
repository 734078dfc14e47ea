//! Error types for toolshed
//!
//! Centralized error handling using thiserror.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// All error types that can occur in toolshed
#[derive(Debug, Error)]
pub enum ToolshedError {
    /// The schema store root does not exist
    #[error("Catalogue not found at {}", .0.display())]
    CatalogueMissing(PathBuf),

    /// No server with this name in the catalogue
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// No tool with this name on the server
    #[error("Unknown tool: {server}/{tool}")]
    UnknownTool { server: String, tool: String },

    /// Parameters could not be parsed into a structured value
    #[error("Malformed parameters: {0}")]
    MalformedParameters(String),

    /// Parameter file or stream could not be read
    #[error("Parameter source unavailable: {0}")]
    ParameterSourceUnavailable(String),

    /// Connection to the server could not be established or was lost
    #[error("Transport unavailable for {server}: {reason}")]
    TransportUnavailable { server: String, reason: String },

    /// The remote tool reported failure; payload is passed through untouched
    #[error("Tool {server}/{tool} failed: {message}")]
    RemoteToolError {
        server: String,
        tool: String,
        message: String,
        payload: Option<Value>,
    },

    /// No response within the deadline
    #[error("Call to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    /// `session call` without a prior `session start`
    #[error("No active session for {0}")]
    NoActiveSession(String),

    /// Session transport could not be established
    #[error("Failed to start session for {server}: {reason}")]
    SessionStartFailed { server: String, reason: String },

    /// Session transport was found dead
    #[error("Session for {server} died: {reason}")]
    SessionDied { server: String, reason: String },

    /// Another call is in flight on the session
    #[error("Session for {0} is busy")]
    SessionBusy(String),

    /// Schema store file is present but unreadable or invalid
    #[error("Catalogue error: {0}")]
    Catalogue(String),

    /// Session record persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IPC communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable error classification, stable across process boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CatalogueMissing,
    UnknownServer,
    UnknownTool,
    MalformedParameters,
    ParameterSourceUnavailable,
    TransportUnavailable,
    RemoteToolError,
    Timeout,
    NoActiveSession,
    SessionStartFailed,
    SessionDied,
    SessionBusy,
    Catalogue,
    Storage,
    Ipc,
    Io,
    Json,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ToolshedError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CatalogueMissing(_) => ErrorKind::CatalogueMissing,
            Self::UnknownServer(_) => ErrorKind::UnknownServer,
            Self::UnknownTool { .. } => ErrorKind::UnknownTool,
            Self::MalformedParameters(_) => ErrorKind::MalformedParameters,
            Self::ParameterSourceUnavailable(_) => ErrorKind::ParameterSourceUnavailable,
            Self::TransportUnavailable { .. } => ErrorKind::TransportUnavailable,
            Self::RemoteToolError { .. } => ErrorKind::RemoteToolError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoActiveSession(_) => ErrorKind::NoActiveSession,
            Self::SessionStartFailed { .. } => ErrorKind::SessionStartFailed,
            Self::SessionDied { .. } => ErrorKind::SessionDied,
            Self::SessionBusy(_) => ErrorKind::SessionBusy,
            Self::Catalogue(_) => ErrorKind::Catalogue,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Ipc(_) => ErrorKind::Ipc,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// The variable part of the message, without the kind-specific prefix.
    ///
    /// Used when an error is relayed over IPC and rebuilt on the other side.
    pub fn detail(&self) -> String {
        match self {
            Self::CatalogueMissing(path) => path.display().to_string(),
            Self::UnknownServer(s) | Self::NoActiveSession(s) | Self::SessionBusy(s) => s.clone(),
            Self::UnknownTool { tool, .. } => tool.clone(),
            Self::MalformedParameters(m)
            | Self::ParameterSourceUnavailable(m)
            | Self::Catalogue(m)
            | Self::Storage(m)
            | Self::Ipc(m) => m.clone(),
            Self::TransportUnavailable { reason, .. }
            | Self::SessionStartFailed { reason, .. }
            | Self::SessionDied { reason, .. } => reason.clone(),
            Self::RemoteToolError { message, .. } => message.clone(),
            Self::Timeout { target, .. } => target.clone(),
            Self::Io(e) => e.to_string(),
            Self::Json(e) => e.to_string(),
        }
    }

    /// Partial output attached to the failure, if any
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::RemoteToolError { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    /// Whether the failure came from the transport rather than the tool
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. } | Self::Timeout { .. })
    }
}

/// Result type alias for toolshed operations
pub type Result<T> = std::result::Result<T, ToolshedError>;
