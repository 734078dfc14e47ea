//! Stateless invocation
//!
//! Every call gets its own connection: resolve, connect, send once, close.
//! Nothing is pooled and nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::binding::{Binding, BindingResolver};
use crate::catalogue::TransportConfig;
use crate::config::InvokeConfig;
use crate::error::{Result, ToolshedError};
use crate::transport::{Connector, Transport};
use crate::value::StructuredValue;

/// Output of a successful call, passed through as the server produced it
pub type InvocationResult = StructuredValue;

/// Connect with a deadline; running out of time counts as unreachable
pub async fn connect_within(
    connector: &dyn Connector,
    server: &str,
    transport: &TransportConfig,
    deadline: Duration,
) -> Result<Box<dyn Transport>> {
    match tokio::time::timeout(deadline, connector.connect(server, transport)).await {
        Ok(result) => result,
        Err(_) => Err(ToolshedError::TransportUnavailable {
            server: server.to_string(),
            reason: format!("connect timed out after {}ms", deadline.as_millis()),
        }),
    }
}

/// Close a transport, giving up after `deadline`.
///
/// Failures are logged; the transport is treated as released either way.
pub async fn close_within(transport: &mut dyn Transport, server: &str, deadline: Duration) {
    match tokio::time::timeout(deadline, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to close connection to {}: {}", server, e),
        Err(_) => warn!("Closing connection to {} gave up after {}ms", server, deadline.as_millis()),
    }
}

/// Send one call with a deadline.
///
/// On expiry the pending call is abandoned and `Timeout` returned; the
/// caller owns closing the transport.
pub async fn call_within(
    transport: &mut dyn Transport,
    binding: &Binding,
    params: &StructuredValue,
    deadline: Duration,
) -> Result<InvocationResult> {
    match tokio::time::timeout(deadline, transport.call_tool(&binding.method, params)).await {
        Ok(result) => result.map_err(|e| attribute(e, binding)),
        Err(_) => Err(ToolshedError::Timeout {
            target: binding.target(),
            timeout_ms: deadline.as_millis() as u64,
        }),
    }
}

/// Report remote failures under the catalogue tool name, not the wire method
fn attribute(err: ToolshedError, binding: &Binding) -> ToolshedError {
    match err {
        ToolshedError::RemoteToolError { message, payload, .. } => ToolshedError::RemoteToolError {
            server: binding.server.clone(),
            tool: binding.tool.clone(),
            message,
            payload,
        },
        other => other,
    }
}

/// Performs one-shot calls, each on a fresh connection
pub struct StatelessInvoker {
    resolver: Arc<BindingResolver>,
    connector: Arc<dyn Connector>,
    config: InvokeConfig,
}

impl std::fmt::Debug for StatelessInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessInvoker").field("config", &self.config).finish()
    }
}

impl StatelessInvoker {
    pub fn new(resolver: Arc<BindingResolver>, connector: Arc<dyn Connector>, config: InvokeConfig) -> Self {
        Self {
            resolver,
            connector,
            config,
        }
    }

    /// Invoke `server/tool` once.
    ///
    /// The connection is closed on every exit path, including timeout.
    pub async fn invoke(&self, server: &str, tool: &str, params: &StructuredValue) -> Result<InvocationResult> {
        let binding = self.resolver.resolve(server, tool)?;
        debug!("Invoking {} via {}", binding.target(), binding.transport.kind());

        let mut transport = connect_within(
            self.connector.as_ref(),
            &binding.server,
            &binding.transport,
            self.config.connect_timeout(),
        )
        .await?;
        let result = call_within(transport.as_mut(), &binding, params, self.config.timeout()).await;

        close_within(transport.as_mut(), &binding.server, self.config.close_timeout()).await;

        match &result {
            Ok(_) => info!("Call {} succeeded", binding.target()),
            Err(e) => info!("Call {} failed: {}", binding.target(), e),
        }
        result
    }
}
