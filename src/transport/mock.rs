//! Scriptable in-memory transport
//!
//! Used by unit and integration tests to drive the invoker and the session
//! manager without spawning tool servers. Replies are consumed in order;
//! once the script runs out every call echoes its request back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{Connector, Transport};
use crate::catalogue::TransportConfig;
use crate::error::{Result, ToolshedError};
use crate::value::StructuredValue;

/// What the next call on a mock transport does
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this value
    Value(StructuredValue),
    /// Fail as the remote tool, carrying this payload
    RemoteError(StructuredValue),
    /// Never answer
    Hang,
    /// Break the connection
    Die,
    /// Wait, then behave like the inner reply
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn delayed(delay: Duration, reply: MockReply) -> Self {
        Self::Delay(delay, Box::new(reply))
    }
}

/// One call as seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub server: String,
    pub method: String,
    pub params: StructuredValue,
}

#[derive(Debug, Default)]
struct MockState {
    script: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<MockCall>>,
    fail_connect: AtomicBool,
    connect_delay_ms: AtomicU64,
    close_delay_ms: AtomicU64,
    /// Bumped by `kill_connections`; transports from older epochs are dead
    epoch: AtomicU64,
    connects: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector handing out [`MockTransport`]s. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for upcoming calls, across all connections
    pub fn with_replies(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        lock(&self.state.script).extend(replies);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        lock(&self.state.script).push_back(reply);
    }

    /// Make `connect` fail with `TransportUnavailable`
    pub fn set_failing(&self, failing: bool) {
        self.state.fail_connect.store(failing, Ordering::SeqCst);
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.connect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Make `close` take this long before releasing the connection
    pub fn with_close_delay(self, delay: Duration) -> Self {
        self.state.close_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Break every connection handed out so far
    pub fn kill_connections(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.connects().saturating_sub(self.closes())
    }

    /// Highest number of calls ever in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.calls).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, server: &str, _config: &TransportConfig) -> Result<Box<dyn Transport>> {
        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(ToolshedError::TransportUnavailable {
                server: server.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            server: server.to_string(),
            epoch: self.state.epoch.load(Ordering::SeqCst),
            state: Arc::clone(&self.state),
            broken: false,
            closed: false,
        }))
    }
}

/// Decrements the in-flight count even when the call future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(&state.in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory transport driven by its connector's script
#[derive(Debug)]
pub struct MockTransport {
    server: String,
    epoch: u64,
    state: Arc<MockState>,
    broken: bool,
    closed: bool,
}

impl MockTransport {
    fn lost(&self) -> ToolshedError {
        ToolshedError::TransportUnavailable {
            server: self.server.clone(),
            reason: "connection lost".to_string(),
        }
    }

    fn killed(&self) -> bool {
        self.state.epoch.load(Ordering::SeqCst) > self.epoch
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call_tool(&mut self, method: &str, params: &StructuredValue) -> Result<StructuredValue> {
        if self.closed || self.broken || self.killed() {
            return Err(self.lost());
        }

        let state = Arc::clone(&self.state);
        let _guard = InFlight::enter(&state);
        lock(&state.calls).push(MockCall {
            server: self.server.clone(),
            method: method.to_string(),
            params: params.clone(),
        });

        let mut reply = lock(&state.script).pop_front().unwrap_or_else(|| {
            MockReply::Value(json!({
                "server": self.server,
                "method": method,
                "params": params,
            }))
        });

        loop {
            match reply {
                MockReply::Value(value) => return Ok(value),
                MockReply::RemoteError(payload) => {
                    return Err(ToolshedError::RemoteToolError {
                        server: self.server.clone(),
                        tool: method.to_string(),
                        message: "mock tool failure".to_string(),
                        payload: Some(payload),
                    });
                }
                MockReply::Hang => std::future::pending::<()>().await,
                MockReply::Die => {
                    self.broken = true;
                    return Err(self.lost());
                }
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let delay = self.state.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 && !self.closed {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.closed {
            self.closed = true;
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.closed && !self.broken && !self.killed()
    }
}
