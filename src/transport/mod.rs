//! Tool server transports
//!
//! A `Transport` is one live connection to one tool server. A `Connector`
//! opens them; the invoker and the session manager only ever see these two
//! traits, so tests swap in [`mock::MockConnector`].

pub mod http;
pub mod mock;
pub mod rpc;
pub mod stdio;

use async_trait::async_trait;
use log::debug;

use crate::catalogue::TransportConfig;
use crate::error::Result;
use crate::value::StructuredValue;

pub use http::HttpTransport;
pub use mock::{MockConnector, MockReply, MockTransport};
pub use stdio::StdioTransport;

/// A live connection to a tool server
#[async_trait]
pub trait Transport: Send {
    /// Send one `tools/call` and wait for its outcome.
    ///
    /// `RemoteToolError` when the tool reports failure, `TransportUnavailable`
    /// when the connection is broken.
    async fn call_tool(&mut self, method: &str, params: &StructuredValue) -> Result<StructuredValue>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    /// Whether the connection still looks usable
    fn is_alive(&mut self) -> bool;
}

/// Opens transports for a server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection, including any protocol handshake.
    ///
    /// Fails with `TransportUnavailable`.
    async fn connect(&self, server: &str, config: &TransportConfig) -> Result<Box<dyn Transport>>;
}

/// Connector dispatching on the configured transport type
#[derive(Debug, Default, Clone)]
pub struct DefaultConnector;

impl DefaultConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, server: &str, config: &TransportConfig) -> Result<Box<dyn Transport>> {
        debug!("Connecting to {} over {}", server, config.kind());
        match config {
            TransportConfig::Stdio { .. } => Ok(Box::new(StdioTransport::connect(server, config).await?)),
            TransportConfig::Http { .. } => Ok(Box::new(HttpTransport::connect(server, config).await?)),
        }
    }
}
