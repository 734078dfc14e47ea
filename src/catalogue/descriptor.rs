//! Server and tool descriptors
//!
//! Index-level data (servers, tool summaries) is kept apart from full tool
//! descriptors so listing never pays for loading the latter.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How to reach a server. Opaque to the core beyond connect/call/close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// JSON-RPC over HTTP POST
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    /// Short name of the transport type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

/// A tool server as recorded in its index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub transport: TransportConfig,
}

/// Reference to an input or output shape: a name, or an inline JSON schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShapeRef {
    Named(String),
    Inline(Value),
}

/// How a tool is addressed on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRef {
    /// Wire method name when it differs from the tool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Full descriptor of a single tool, loaded on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ShapeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ShapeRef>,
    #[serde(default)]
    pub binding: BindingRef,
}

impl ToolDescriptor {
    /// Create a descriptor with no shapes and the default binding
    pub fn new(server: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
            description: description.into(),
            input: None,
            output: None,
            binding: BindingRef::default(),
        }
    }

    /// Set input shape
    pub fn with_input(mut self, shape: ShapeRef) -> Self {
        self.input = Some(shape);
        self
    }

    /// Set output shape
    pub fn with_output(mut self, shape: ShapeRef) -> Self {
        self.output = Some(shape);
        self
    }

    /// Set the wire method name
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.binding.method = Some(method.into());
        self
    }

    /// Method name sent over the transport
    pub fn method(&self) -> &str {
        self.binding.method.as_deref().unwrap_or(&self.name)
    }
}

/// One line of `discover`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub name: String,
    pub tool_count: usize,
}

/// One line of `discover list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub short_description: String,
}

/// Everything an index file says about a server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIndex {
    pub server: ServerDescriptor,
    pub tools: Vec<ToolSummary>,
}

impl ServerIndex {
    /// Number of tools listed
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Find a tool's summary
    pub fn tool(&self, name: &str) -> Option<&ToolSummary> {
        self.tools.iter().find(|t| t.name == name)
    }
}
