//! JSON-RPC 2.0 framing for tool servers
//!
//! Tool servers speak JSON-RPC with the MCP method set. Only the handful of
//! messages a client needs are modelled here.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ToolshedError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Well-known JSON-RPC method names
pub struct Methods;

impl Methods {
    pub const INITIALIZE: &'static str = "initialize";
    pub const INITIALIZED: &'static str = "notifications/initialized";
    pub const TOOLS_CALL: &'static str = "tools/call";
    pub const PING: &'static str = "ping";
}

/// Standard JSON-RPC error codes
pub struct ErrorCode;

impl ErrorCode {
    pub const METHOD_NOT_FOUND: i32 = -32601;
}

/// Outgoing request or notification (no `id`)
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// `initialize` request opening the MCP handshake
    pub fn initialize(id: u64) -> Self {
        Self::new(
            id,
            Methods::INITIALIZE,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    /// `tools/call` request for one tool
    pub fn tools_call(id: u64, method: &str, arguments: &Value) -> Self {
        Self::new(
            id,
            Methods::TOOLS_CALL,
            json!({
                "name": method,
                "arguments": arguments,
            }),
        )
    }
}

/// Outgoing response to a server-initiated request
#[derive(Debug, Clone, Serialize)]
pub struct RpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcReply {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Any message a server can send: a response, a request or a notification
#[derive(Debug, Clone, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcMessage {
    /// Response to our request `id`
    pub fn is_response_to(&self, id: u64) -> bool {
        self.method.is_none() && self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }

    /// Request from the server that expects a reply
    pub fn is_server_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// Reply we owe a server-initiated request.
    ///
    /// Only `ping` is answered; everything else is refused.
    pub fn reply(&self) -> Option<RpcReply> {
        let id = self.id.clone()?;
        match self.method.as_deref()? {
            Methods::PING => Some(RpcReply::success(id, json!({}))),
            other => Some(RpcReply::error(
                id,
                RpcError::new(ErrorCode::METHOD_NOT_FOUND, format!("Method not supported: {}", other)),
            )),
        }
    }
}

/// Map a `tools/call` response onto the call's outcome.
///
/// A JSON-RPC error or a result flagged `isError` is a remote failure whose
/// raw body is kept as the payload. Otherwise `structuredContent` is
/// preferred over the raw result.
pub fn tool_outcome(server: &str, tool: &str, message: RpcMessage) -> Result<Value, ToolshedError> {
    if let Some(error) = message.error {
        let text = error.message.clone();
        return Err(ToolshedError::RemoteToolError {
            server: server.to_string(),
            tool: tool.to_string(),
            message: text,
            payload: Some(serde_json::to_value(error)?),
        });
    }

    let result = message.result.unwrap_or(Value::Null);
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ToolshedError::RemoteToolError {
            server: server.to_string(),
            tool: tool.to_string(),
            message: first_text(&result).unwrap_or_else(|| "tool reported an error".to_string()),
            payload: Some(result),
        });
    }

    match result.get("structuredContent") {
        Some(structured) if !structured.is_null() => Ok(structured.clone()),
        _ => Ok(result),
    }
}

/// First text content block of a tool result
fn first_text(result: &Value) -> Option<String> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Check an `initialize` response; a server that rejects the handshake is
/// unreachable as far as we are concerned.
pub fn check_initialized(server: &str, message: &RpcMessage) -> Result<(), ToolshedError> {
    match &message.error {
        Some(error) => Err(ToolshedError::TransportUnavailable {
            server: server.to_string(),
            reason: format!("initialize rejected: {}", error.message),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: Value) -> RpcMessage {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_tools_call_request() {
        let req = RpcRequest::tools_call(7, "getJiraIssue", &json!({"issueIdOrKey": "API-86"}));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "tools/call");
        assert_eq!(json["params"]["name"], "getJiraIssue");
        assert_eq!(json["params"]["arguments"]["issueIdOrKey"], "API-86");
    }

    #[test]
    fn test_notification_has_no_id() {
        let json = serde_json::to_value(RpcRequest::notification(Methods::INITIALIZED)).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_initialize_carries_protocol_version() {
        let json = serde_json::to_value(RpcRequest::initialize(1)).unwrap();
        assert_eq!(json["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(json["params"]["clientInfo"]["name"], "toolshed");
    }

    #[test]
    fn test_message_classification() {
        let msg = response(json!({"jsonrpc": "2.0", "id": 3, "result": {}}));
        assert!(msg.is_response_to(3));
        assert!(!msg.is_response_to(4));
        assert!(!msg.is_server_request());

        let ping = response(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}));
        assert!(ping.is_server_request());
        let reply = serde_json::to_value(ping.reply().unwrap()).unwrap();
        assert_eq!(reply["id"], "srv-1");
        assert_eq!(reply["result"], json!({}));

        let sampling = response(json!({"jsonrpc": "2.0", "id": 9, "method": "sampling/createMessage"}));
        let reply = serde_json::to_value(sampling.reply().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], ErrorCode::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_outcome_prefers_structured_content() {
        let msg = response(json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {"content": [{"type": "text", "text": "{}"}], "structuredContent": {"key": "API-86"}}
        }));
        assert_eq!(tool_outcome("atlassian", "getJiraIssue", msg).unwrap(), json!({"key": "API-86"}));
    }

    #[test]
    fn test_outcome_raw_result() {
        let result = json!({"content": [{"type": "text", "text": "navigated"}]});
        let msg = response(json!({"jsonrpc": "2.0", "id": 1, "result": result.clone()}));
        assert_eq!(tool_outcome("chrome-devtools", "navigate_page", msg).unwrap(), result);
    }

    #[test]
    fn test_outcome_is_error_keeps_payload() {
        let result = json!({"isError": true, "content": [{"type": "text", "text": "Issue does not exist"}]});
        let msg = response(json!({"jsonrpc": "2.0", "id": 1, "result": result.clone()}));
        let err = tool_outcome("atlassian", "getJiraIssue", msg).unwrap_err();
        match err {
            ToolshedError::RemoteToolError { message, payload, .. } => {
                assert_eq!(message, "Issue does not exist");
                assert_eq!(payload, Some(result));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_outcome_rpc_error() {
        let msg = response(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32602, "message": "Unknown tool: nope"}
        }));
        let err = tool_outcome("atlassian", "nope", msg).unwrap_err();
        assert!(matches!(err, ToolshedError::RemoteToolError { .. }));
        assert_eq!(err.payload().unwrap()["code"], -32602);
    }

    #[test]
    fn test_initialize_rejected() {
        let msg = response(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32600, "message": "bad version"}}));
        assert!(matches!(
            check_initialized("atlassian", &msg),
            Err(ToolshedError::TransportUnavailable { .. })
        ));
    }
}
