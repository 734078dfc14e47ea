//! Binding resolution
//!
//! Turns a (server, tool) pair into everything needed to put a call on the
//! wire. Only the one tool's descriptor is loaded; no network I/O happens here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::catalogue::{CatalogueIndex, ServerDescriptor, ShapeRef, TransportConfig};
use crate::error::{Result, ToolshedError};

/// Resolved, invocable reference to one tool on one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub server: String,
    pub tool: String,
    /// Name sent over the transport
    pub method: String,
    pub transport: TransportConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<ShapeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ShapeRef>,
}

impl Binding {
    /// `server/tool`, used in logs and timeout errors
    pub fn target(&self) -> String {
        format!("{}/{}", self.server, self.tool)
    }
}

/// Resolves and caches bindings
#[derive(Debug)]
pub struct BindingResolver {
    index: Arc<CatalogueIndex>,
    cache: RwLock<HashMap<(String, String), Arc<Binding>>>,
}

impl BindingResolver {
    pub fn new(index: Arc<CatalogueIndex>) -> Self {
        Self {
            index,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The catalogue this resolver reads from
    pub fn index(&self) -> &Arc<CatalogueIndex> {
        &self.index
    }

    /// Server descriptor, for callers that connect before knowing a tool
    pub fn server(&self, server: &str) -> Result<ServerDescriptor> {
        self.index.server_descriptor(server)
    }

    /// Resolve a tool to a binding. Fails with `UnknownServer`/`UnknownTool`.
    pub fn resolve(&self, server: &str, tool: &str) -> Result<Arc<Binding>> {
        let key = (server.to_string(), tool.to_string());
        {
            let cache = self.cache.read().map_err(|e| ToolshedError::Catalogue(e.to_string()))?;
            if let Some(binding) = cache.get(&key) {
                return Ok(Arc::clone(binding));
            }
        }

        let descriptor = self.index.get_tool_descriptor(server, tool)?;
        let server_descriptor = self.index.server_descriptor(server)?;

        let binding = Arc::new(Binding {
            server: server.to_string(),
            tool: tool.to_string(),
            method: descriptor.method().to_string(),
            transport: server_descriptor.transport,
            input: descriptor.input.clone(),
            output: descriptor.output.clone(),
        });

        let mut cache = self.cache.write().map_err(|e| ToolshedError::Catalogue(e.to_string()))?;
        Ok(Arc::clone(cache.entry(key).or_insert(binding)))
    }
}
