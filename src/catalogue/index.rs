//! Catalogue index: cheap listings, on-demand descriptors.
//!
//! Listing servers and tools reads index files only. A tool's descriptor file
//! is read the first time `get_tool_descriptor` asks for that exact tool, and
//! served from cache afterwards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, warn};
use serde::Serialize;

use crate::error::{Result, ToolshedError};

use super::descriptor::{ServerDescriptor, ServerIndex, ServerSummary, ToolDescriptor, ToolSummary};
use super::store::SchemaStore;

/// A `discover search` match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub server: String,
    /// None when the server itself matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub description: String,
}

/// In-memory view over a schema store
pub struct CatalogueIndex {
    store: Arc<dyn SchemaStore>,
    servers: RwLock<HashMap<String, Arc<ServerIndex>>>,
    descriptors: RwLock<HashMap<(String, String), Arc<ToolDescriptor>>>,
}

impl std::fmt::Debug for CatalogueIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogueIndex").finish_non_exhaustive()
    }
}

impl CatalogueIndex {
    /// Create an index over the given store
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        Self {
            store,
            servers: RwLock::new(HashMap::new()),
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// Load a server's index, reading the store only on first use
    fn server_index(&self, server: &str) -> Result<Arc<ServerIndex>> {
        {
            let servers = self.servers.read().map_err(|e| ToolshedError::Catalogue(e.to_string()))?;
            if let Some(index) = servers.get(server) {
                return Ok(Arc::clone(index));
            }
        }

        let index = Arc::new(self.store.read_index(server)?);
        debug!("Loaded index for {} ({} tools)", server, index.tool_count());

        let mut servers = self.servers.write().map_err(|e| ToolshedError::Catalogue(e.to_string()))?;
        let entry = servers.entry(server.to_string()).or_insert(index);
        Ok(Arc::clone(entry))
    }

    /// All servers with their tool counts, ordered by name.
    ///
    /// An empty store is reported the same way as a missing one.
    pub fn list_servers(&self) -> Result<Vec<ServerSummary>> {
        self.store.ensure_present()?;
        let names = self.store.server_names()?;

        let mut summaries = Vec::with_capacity(names.len());
        let mut first_error = None;
        for name in names {
            match self.server_index(&name) {
                Ok(index) => summaries.push(ServerSummary {
                    name,
                    tool_count: index.tool_count(),
                }),
                Err(e) => {
                    warn!("Skipping server {}: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if summaries.is_empty() {
            // Every index was unreadable: report why, not an empty store
            return Err(
                first_error.unwrap_or_else(|| ToolshedError::CatalogueMissing(self.store.root().to_path_buf()))
            );
        }
        Ok(summaries)
    }

    /// A server's tools in index order
    pub fn list_tools(&self, server: &str) -> Result<Vec<ToolSummary>> {
        Ok(self.server_index(server)?.tools.clone())
    }

    /// A server's descriptor (name, description, transport)
    pub fn server_descriptor(&self, server: &str) -> Result<ServerDescriptor> {
        Ok(self.server_index(server)?.server.clone())
    }

    /// Full descriptor for one tool, loaded on first request then cached
    pub fn get_tool_descriptor(&self, server: &str, tool: &str) -> Result<Arc<ToolDescriptor>> {
        let key = (server.to_string(), tool.to_string());
        {
            let descriptors = self.descriptors.read().map_err(|e| ToolshedError::Catalogue(e.to_string()))?;
            if let Some(descriptor) = descriptors.get(&key) {
                return Ok(Arc::clone(descriptor));
            }
        }

        let index = self.server_index(server)?;
        let summary = index.tool(tool).ok_or_else(|| ToolshedError::UnknownTool {
            server: server.to_string(),
            tool: tool.to_string(),
        })?;

        let mut descriptor = self.store.read_descriptor(server, tool)?;
        if descriptor.description.is_empty() {
            descriptor.description = summary.short_description.clone();
        }
        debug!("Loaded descriptor for {}/{}", server, tool);

        let mut descriptors = self.descriptors.write().map_err(|e| ToolshedError::Catalogue(e.to_string()))?;
        let entry = descriptors.entry(key).or_insert_with(|| Arc::new(descriptor));
        Ok(Arc::clone(entry))
    }

    /// Case-insensitive substring search over index data
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();

        for name in self.store.server_names()? {
            let index = match self.server_index(&name) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Skipping server {} during search: {}", name, e);
                    continue;
                }
            };

            let server_description = index.server.description.clone().unwrap_or_default();
            if name.to_lowercase().contains(&needle) || server_description.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    server: name.clone(),
                    tool: None,
                    description: server_description,
                });
            }

            for tool in &index.tools {
                if tool.name.to_lowercase().contains(&needle)
                    || tool.short_description.to_lowercase().contains(&needle)
                {
                    hits.push(SearchHit {
                        server: name.clone(),
                        tool: Some(tool.name.clone()),
                        description: tool.short_description.clone(),
                    });
                }
            }
        }

        Ok(hits)
    }

    /// Number of descriptors currently cached
    pub fn loaded_descriptor_count(&self) -> usize {
        self.descriptors.read().map(|d| d.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::store::{FsSchemaStore, INDEX_FILE, TOOLS_DIR};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Store wrapper that records every read
    struct CountingStore {
        inner: FsSchemaStore,
        index_reads: Mutex<Vec<String>>,
        descriptor_reads: Mutex<Vec<(String, String)>>,
    }

    impl CountingStore {
        fn new(inner: FsSchemaStore) -> Self {
            Self {
                inner,
                index_reads: Mutex::new(Vec::new()),
                descriptor_reads: Mutex::new(Vec::new()),
            }
        }
    }

    impl SchemaStore for CountingStore {
        fn root(&self) -> &std::path::Path {
            self.inner.root()
        }

        fn ensure_present(&self) -> Result<()> {
            self.inner.ensure_present()
        }

        fn server_names(&self) -> Result<Vec<String>> {
            self.inner.server_names()
        }

        fn read_index(&self, server: &str) -> Result<ServerIndex> {
            self.index_reads.lock().unwrap().push(server.to_string());
            self.inner.read_index(server)
        }

        fn read_descriptor(&self, server: &str, tool: &str) -> Result<ToolDescriptor> {
            self.descriptor_reads
                .lock()
                .unwrap()
                .push((server.to_string(), tool.to_string()));
            self.inner.read_descriptor(server, tool)
        }
    }

    fn write_server(root: &std::path::Path, name: &str, tools: &[&str]) {
        let dir = root.join(name);
        fs::create_dir_all(dir.join(TOOLS_DIR)).unwrap();
        let mut index = String::from("[transport]\ntype = \"stdio\"\ncommand = \"true\"\n");
        for tool in tools {
            index.push_str(&format!("\n[[tool]]\nname = \"{}\"\ndescription = \"{} summary\"\n", tool, tool));
            fs::write(dir.join(TOOLS_DIR).join(format!("{}.json", tool)), "{}").unwrap();
        }
        fs::write(dir.join(INDEX_FILE), index).unwrap();
    }

    fn create_index() -> (CatalogueIndex, Arc<CountingStore>, TempDir) {
        let temp = TempDir::new().unwrap();
        write_server(temp.path(), "chrome-devtools", &["navigate_page", "take_screenshot", "click"]);
        write_server(temp.path(), "atlassian", &["getJiraIssue", "createJiraIssue"]);
        let store = Arc::new(CountingStore::new(FsSchemaStore::new(temp.path())));
        let index = CatalogueIndex::new(store.clone());
        (index, store, temp)
    }

    #[test]
    fn test_list_servers_sorted_with_counts() {
        let (index, _store, _temp) = create_index();
        let servers = index.list_servers().unwrap();
        assert_eq!(
            servers,
            vec![
                ServerSummary {
                    name: "atlassian".to_string(),
                    tool_count: 2
                },
                ServerSummary {
                    name: "chrome-devtools".to_string(),
                    tool_count: 3
                },
            ]
        );
    }

    #[test]
    fn test_listing_never_loads_descriptors() {
        let (index, store, _temp) = create_index();
        index.list_servers().unwrap();
        index.list_tools("atlassian").unwrap();
        index.list_tools("chrome-devtools").unwrap();
        index.search("jira").unwrap();

        assert!(store.descriptor_reads.lock().unwrap().is_empty());
        assert_eq!(index.loaded_descriptor_count(), 0);
    }

    #[test]
    fn test_get_descriptor_loads_only_that_tool() {
        let (index, store, _temp) = create_index();
        let tool = index.get_tool_descriptor("atlassian", "getJiraIssue").unwrap();
        assert_eq!(tool.name, "getJiraIssue");
        // Falls back to the index summary when the descriptor has none
        assert_eq!(tool.description, "getJiraIssue summary");

        let reads = store.descriptor_reads.lock().unwrap().clone();
        assert_eq!(reads, vec![("atlassian".to_string(), "getJiraIssue".to_string())]);
    }

    #[test]
    fn test_get_descriptor_cached() {
        let (index, store, _temp) = create_index();
        let first = index.get_tool_descriptor("atlassian", "getJiraIssue").unwrap();
        let second = index.get_tool_descriptor("atlassian", "getJiraIssue").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.descriptor_reads.lock().unwrap().len(), 1);
        assert_eq!(index.loaded_descriptor_count(), 1);
    }

    #[test]
    fn test_server_index_read_once() {
        let (index, store, _temp) = create_index();
        index.list_tools("atlassian").unwrap();
        index.list_tools("atlassian").unwrap();
        index.server_descriptor("atlassian").unwrap();
        assert_eq!(store.index_reads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_server_and_tool() {
        let (index, store, _temp) = create_index();
        assert!(matches!(index.list_tools("github"), Err(ToolshedError::UnknownServer(_))));
        assert!(matches!(
            index.get_tool_descriptor("atlassian", "deleteProject"),
            Err(ToolshedError::UnknownTool { .. })
        ));
        // Tools not in the index never reach the store
        assert!(store.descriptor_reads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_and_empty_catalogue() {
        let index = CatalogueIndex::new(Arc::new(FsSchemaStore::new("/no/such/catalogue")));
        assert!(matches!(index.list_servers(), Err(ToolshedError::CatalogueMissing(_))));

        let temp = TempDir::new().unwrap();
        let index = CatalogueIndex::new(Arc::new(FsSchemaStore::new(temp.path())));
        assert!(matches!(index.list_servers(), Err(ToolshedError::CatalogueMissing(_))));
    }

    #[test]
    fn test_unreadable_indexes() {
        let temp = TempDir::new().unwrap();
        write_server(temp.path(), "atlassian", &["getJiraIssue"]);
        fs::create_dir_all(temp.path().join("broken")).unwrap();
        fs::write(temp.path().join("broken").join(INDEX_FILE), "[[tool]\nname = ").unwrap();

        // One bad index is skipped
        let index = CatalogueIndex::new(Arc::new(FsSchemaStore::new(temp.path())));
        let servers = index.list_servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "atlassian");

        // With nothing readable the parse error surfaces
        fs::remove_dir_all(temp.path().join("atlassian")).unwrap();
        let index = CatalogueIndex::new(Arc::new(FsSchemaStore::new(temp.path())));
        assert!(matches!(index.list_servers(), Err(ToolshedError::Catalogue(_))));
    }

    #[test]
    fn test_search_matches_servers_and_tools() {
        let (index, _store, _temp) = create_index();
        let hits = index.search("JIRA").unwrap();
        let tools: Vec<_> = hits.iter().filter_map(|h| h.tool.as_deref()).collect();
        assert_eq!(tools, vec!["getJiraIssue", "createJiraIssue"]);

        let hits = index.search("chrome").unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].tool.is_none());
    }
}
