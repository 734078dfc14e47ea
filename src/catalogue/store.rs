//! Schema store: where server indexes and tool descriptors live.
//!
//! The store is a capability handed to the catalogue index, so tests can swap
//! the filesystem for something in memory.
//!
//! On-disk layout:
//!
//! ```text
//! <root>/<server>/index.toml          server description, transport, tool summaries
//! <root>/<server>/tools/<tool>.json   full descriptor for one tool
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ToolshedError};

use super::descriptor::{
    BindingRef, ServerDescriptor, ServerIndex, ShapeRef, ToolDescriptor, ToolSummary, TransportConfig,
};

/// Name of the per-server index file
pub const INDEX_FILE: &str = "index.toml";

/// Directory holding per-tool descriptor files
pub const TOOLS_DIR: &str = "tools";

/// Source of catalogue data
pub trait SchemaStore: Send + Sync {
    /// Where the store lives, for error messages
    fn root(&self) -> &Path;

    /// Fail with `CatalogueMissing` when there is nothing to read
    fn ensure_present(&self) -> Result<()>;

    /// Names of all servers, sorted
    fn server_names(&self) -> Result<Vec<String>>;

    /// Read one server's index. Never touches tool descriptor files.
    fn read_index(&self, server: &str) -> Result<ServerIndex>;

    /// Read one tool's full descriptor
    fn read_descriptor(&self, server: &str, tool: &str) -> Result<ToolDescriptor>;
}

/// TOML representation of the server section
#[derive(Debug, Default, Deserialize)]
struct TomlServer {
    description: Option<String>,
}

/// TOML representation of a tool summary
#[derive(Debug, Deserialize)]
struct TomlTool {
    name: String,
    #[serde(default)]
    description: String,
}

/// index.toml file structure
#[derive(Debug, Deserialize)]
struct TomlIndex {
    #[serde(default)]
    server: TomlServer,
    transport: TransportConfig,
    #[serde(default, rename = "tool")]
    tools: Vec<TomlTool>,
}

/// tools/<tool>.json file structure
#[derive(Debug, Deserialize)]
struct JsonDescriptor {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input: Option<ShapeRef>,
    #[serde(default)]
    output: Option<ShapeRef>,
    #[serde(default)]
    binding: BindingRef,
}

/// Reject names that would escape the store root
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\']) && !name.contains("..")
}

/// Parse an index file's contents
pub fn parse_index(server: &str, content: &str) -> Result<ServerIndex> {
    let index: TomlIndex = toml::from_str(content)
        .map_err(|e| ToolshedError::Catalogue(format!("Failed to parse index for '{}': {}", server, e)))?;

    let mut tools: Vec<ToolSummary> = Vec::with_capacity(index.tools.len());
    for tool in index.tools {
        if !is_safe_name(&tool.name) {
            return Err(ToolshedError::Catalogue(format!(
                "Invalid tool name '{}' in index for '{}'",
                tool.name, server
            )));
        }
        if tools.iter().any(|t| t.name == tool.name) {
            return Err(ToolshedError::Catalogue(format!(
                "Duplicate tool '{}' in index for '{}'",
                tool.name, server
            )));
        }
        tools.push(ToolSummary {
            name: tool.name,
            short_description: tool.description,
        });
    }

    Ok(ServerIndex {
        server: ServerDescriptor {
            name: server.to_string(),
            description: index.server.description,
            transport: index.transport,
        },
        tools,
    })
}

/// Parse a descriptor file's contents
pub fn parse_descriptor(server: &str, tool: &str, content: &str) -> Result<ToolDescriptor> {
    let file: JsonDescriptor = serde_json::from_str(content).map_err(|e| {
        ToolshedError::Catalogue(format!("Failed to parse descriptor for '{}/{}': {}", server, tool, e))
    })?;

    Ok(ToolDescriptor {
        server: server.to_string(),
        name: tool.to_string(),
        description: file.description.unwrap_or_default(),
        input: file.input,
        output: file.output,
        binding: file.binding,
    })
}

/// Filesystem-backed schema store
#[derive(Debug, Clone)]
pub struct FsSchemaStore {
    root: PathBuf,
}

impl FsSchemaStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn server_dir(&self, server: &str) -> Result<PathBuf> {
        if !is_safe_name(server) {
            return Err(ToolshedError::UnknownServer(server.to_string()));
        }
        Ok(self.root.join(server))
    }

    fn read_file(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map_err(|e| ToolshedError::Catalogue(format!("Failed to read {}: {}", path.display(), e)))
    }
}

impl SchemaStore for FsSchemaStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_present(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(ToolshedError::CatalogueMissing(self.root.clone()))
        }
    }

    fn server_names(&self) -> Result<Vec<String>> {
        self.ensure_present()?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_safe_name(&name) && entry.path().join(INDEX_FILE).is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_index(&self, server: &str) -> Result<ServerIndex> {
        self.ensure_present()?;
        let path = self.server_dir(server)?.join(INDEX_FILE);
        if !path.is_file() {
            return Err(ToolshedError::UnknownServer(server.to_string()));
        }
        let content = Self::read_file(&path)?;
        parse_index(server, &content)
    }

    fn read_descriptor(&self, server: &str, tool: &str) -> Result<ToolDescriptor> {
        self.ensure_present()?;
        if !is_safe_name(tool) {
            return Err(ToolshedError::UnknownTool {
                server: server.to_string(),
                tool: tool.to_string(),
            });
        }
        let path = self.server_dir(server)?.join(TOOLS_DIR).join(format!("{}.json", tool));
        if !path.is_file() {
            return Err(ToolshedError::UnknownTool {
                server: server.to_string(),
                tool: tool.to_string(),
            });
        }
        let content = Self::read_file(&path)?;
        parse_descriptor(server, tool, &content)
    }
}
