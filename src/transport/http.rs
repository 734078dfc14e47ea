//! HTTP transport: JSON-RPC over POST, with JSON or event-stream replies

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::Transport;
use super::rpc::{self, RpcMessage, RpcRequest};
use crate::catalogue::TransportConfig;
use crate::error::{Result, ToolshedError};
use crate::id::RequestIds;
use crate::value::StructuredValue;

/// Header carrying the server-issued session id
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Bound on opening a TCP/TLS connection; the whole request is bounded by callers
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the session `DELETE` sent on close
const DELETE_TIMEOUT: Duration = Duration::from_secs(2);

fn unavailable(server: &str, reason: impl Display) -> ToolshedError {
    ToolshedError::TransportUnavailable {
        server: server.to_string(),
        reason: reason.to_string(),
    }
}

fn build_headers(server: &str, headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| unavailable(server, format!("invalid header name {}: {}", name, e)))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| unavailable(server, format!("invalid header value: {}", e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Find the response to `id` in a `text/event-stream` body
pub fn parse_event_stream(body: &str, id: u64) -> Option<RpcMessage> {
    let mut data = String::new();
    let mut found = None;

    let mut flush = |data: &mut String| {
        if !data.is_empty() && found.is_none() {
            match serde_json::from_str::<RpcMessage>(data) {
                Ok(message) if message.is_response_to(id) => found = Some(message),
                Ok(_) => {}
                Err(e) => warn!("Skipping unparseable event: {}", e),
            }
        }
        data.clear();
    };

    for line in body.lines() {
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);

    found
}

/// Connection to a tool server reachable over HTTP
#[derive(Debug)]
pub struct HttpTransport {
    server: String,
    client: Client,
    url: String,
    headers: HeaderMap,
    session_id: Option<String>,
    ids: RequestIds,
    closed: bool,
}

impl HttpTransport {
    /// Build a client and complete the MCP handshake
    pub async fn connect(server: &str, config: &TransportConfig) -> Result<Self> {
        let TransportConfig::Http { url, headers } = config else {
            return Err(unavailable(server, format!("not an http transport: {}", config.kind())));
        };

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| unavailable(server, format!("failed to build client: {}", e)))?;

        let mut transport = Self {
            server: server.to_string(),
            client,
            url: url.clone(),
            headers: build_headers(server, headers)?,
            session_id: None,
            ids: RequestIds::new(),
            closed: false,
        };
        transport.handshake().await?;
        Ok(transport)
    }

    /// Session id issued by the server, if any
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn handshake(&mut self) -> Result<()> {
        let id = self.ids.next_id();
        let response = self
            .post(&RpcRequest::initialize(id), Some(id))
            .await?
            .ok_or_else(|| unavailable(&self.server, "no reply to initialize"))?;
        rpc::check_initialized(&self.server, &response)?;
        self.post(&RpcRequest::notification(rpc::Methods::INITIALIZED), None).await?;
        debug!("Handshake with {} complete (session {:?})", self.server, self.session_id);
        Ok(())
    }

    /// POST one message. Notifications (`id` None) expect no reply.
    async fn post(&mut self, body: &RpcRequest, id: Option<u64>) -> Result<Option<RpcMessage>> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| unavailable(&self.server, format!("request failed: {}", e)))?;

        if let Some(session_id) = response.headers().get(SESSION_HEADER).and_then(|h| h.to_str().ok()) {
            self.session_id = Some(session_id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(&self.server, format!("HTTP {}: {}", status, body)));
        }

        let Some(id) = id else {
            return Ok(None);
        };

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = response
            .text()
            .await
            .map_err(|e| unavailable(&self.server, format!("failed to read body: {}", e)))?;

        if is_stream {
            parse_event_stream(&text, id)
                .map(Some)
                .ok_or_else(|| unavailable(&self.server, "event stream ended without a response"))
        } else {
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| unavailable(&self.server, format!("invalid response: {}", e)))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call_tool(&mut self, method: &str, params: &StructuredValue) -> Result<StructuredValue> {
        if self.closed {
            return Err(unavailable(&self.server, "transport closed"));
        }
        let id = self.ids.next_id();
        let response = self
            .post(&RpcRequest::tools_call(id, method, params), Some(id))
            .await?
            .ok_or_else(|| unavailable(&self.server, "no reply to tools/call"))?;
        rpc::tool_outcome(&self.server, method, response)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(session_id) = self.session_id.take() {
            let result = self
                .client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, session_id)
                .timeout(DELETE_TIMEOUT)
                .send()
                .await;
            if let Err(e) = result {
                debug!("Session delete for {} failed: {}", self.server, e);
            }
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_event_stream() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"structuredContent\":{\"ok\":true}}}\n\
                    \n";
        let message = parse_event_stream(body, 2).unwrap();
        assert_eq!(message.result.unwrap()["structuredContent"], json!({"ok": true}));
    }

    #[test]
    fn test_parse_event_stream_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\n\
                    data: \"id\":5,\"result\":{}}\n";
        assert!(parse_event_stream(body, 5).is_some());
    }

    #[test]
    fn test_parse_event_stream_without_response() {
        let body = "data: not json\n\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        assert!(parse_event_stream(body, 2).is_none());
    }

    #[test]
    fn test_invalid_header() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            build_headers("atlassian", &headers),
            Err(ToolshedError::TransportUnavailable { .. })
        ));

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        assert_eq!(build_headers("atlassian", &headers).unwrap().len(), 1);
    }

    /// Serve `initialize` with a session id, accept the initialized
    /// notification, then never answer anything else
    async fn unresponsive_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let Ok(n) = stream.read(&mut chunk).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf).to_string();
                        let Some(head_end) = text.find("\r\n\r\n") else {
                            continue;
                        };
                        let length = text[..head_end]
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() < head_end + 4 + length {
                            continue;
                        }
                        let body = text[head_end + 4..head_end + 4 + length].to_string();
                        buf.drain(..head_end + 4 + length);

                        let reply = if body.contains(rpc::Methods::INITIALIZED) {
                            "HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n".to_string()
                        } else if body.contains("\"initialize\"") {
                            let json = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}"#;
                            format!(
                                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nmcp-session-id: abc\r\ncontent-length: {}\r\n\r\n{}",
                                json.len(),
                                json
                            )
                        } else {
                            // tools/call and DELETE hang
                            std::future::pending::<()>().await;
                            return;
                        };
                        if stream.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        format!("http://{}/mcp", addr)
    }

    #[tokio::test]
    async fn test_close_after_timeout_is_bounded() {
        let config = TransportConfig::Http {
            url: unresponsive_server().await,
            headers: BTreeMap::new(),
        };
        let mut transport = HttpTransport::connect("atlassian", &config).await.unwrap();
        assert_eq!(transport.session_id(), Some("abc"));

        let call = tokio::time::timeout(
            Duration::from_millis(200),
            transport.call_tool("getJiraIssue", &json!({})),
        )
        .await;
        assert!(call.is_err());

        let closed = tokio::time::timeout(DELETE_TIMEOUT + Duration::from_secs(3), transport.close()).await;
        assert!(matches!(closed, Ok(Ok(()))));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = TransportConfig::Http {
            url: "http://127.0.0.1:1/mcp".to_string(),
            headers: BTreeMap::new(),
        };
        let result = HttpTransport::connect("atlassian", &config).await;
        assert!(matches!(result, Err(ToolshedError::TransportUnavailable { .. })));
    }
}
