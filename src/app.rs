//! Command handlers
//!
//! Each handler writes its payload to the given writer and nothing else;
//! diagnostics go to the log.

use std::io::Write;
use std::sync::Arc;

use colored::*;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;

use crate::binding::BindingResolver;
use crate::catalogue::{CatalogueIndex, FsSchemaStore, SchemaStore};
use crate::cli::{Commands, DiscoverCommands, SessionCommands};
use crate::config::Config;
use crate::error::{Result, ToolshedError};
use crate::invoker::StatelessInvoker;
use crate::params::{ParamSource, normalize};
use crate::recovery;
use crate::session::{HostLauncher, Persistence, SessionClient, SessionHost, SessionManager, SessionStore};
use crate::transport::{Connector, DefaultConnector};
use crate::value::render;

fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    writeln!(out, "{}", render(&serde_json::to_value(value)?)?)?;
    Ok(())
}

/// Everything a command needs, built once per process
pub struct App {
    config: Config,
    index: Arc<CatalogueIndex>,
    resolver: Arc<BindingResolver>,
    connector: Arc<dyn Connector>,
    launcher: HostLauncher,
}

impl App {
    /// Build over the configured schema store, connecting for real
    pub fn new(config: Config, launcher: HostLauncher) -> Self {
        let store: Arc<dyn SchemaStore> = Arc::new(FsSchemaStore::new(&config.catalogue.root));
        Self::with_store(config, store, Arc::new(DefaultConnector::new()), launcher)
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn SchemaStore>,
        connector: Arc<dyn Connector>,
        launcher: HostLauncher,
    ) -> Self {
        let index = Arc::new(CatalogueIndex::new(store));
        let resolver = Arc::new(BindingResolver::new(Arc::clone(&index)));
        Self {
            config,
            index,
            resolver,
            connector,
            launcher,
        }
    }

    /// Swap the connector, keeping everything else
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub async fn run<W: Write>(&self, command: &Commands, out: &mut W) -> Result<()> {
        debug!("Running {:?}", command);
        match command {
            Commands::Discover { command, json } => self.discover(command.as_ref(), *json, out),
            Commands::Call { server, tool, params } => self.call(server, tool, params.as_deref(), out).await,
            Commands::Session { command } => self.session(command, out).await,
        }
    }

    fn discover<W: Write>(&self, command: Option<&DiscoverCommands>, json: bool, out: &mut W) -> Result<()> {
        match command {
            None => {
                let servers = self.index.list_servers()?;
                if json {
                    return write_json(out, &servers);
                }
                for server in &servers {
                    writeln!(out, "{} {} tools", format!("{:<24}", server.name).cyan(), server.tool_count)?;
                }
            }
            Some(DiscoverCommands::List { server }) => {
                let tools = self.index.list_tools(server)?;
                if json {
                    return write_json(out, &tools);
                }
                for tool in &tools {
                    writeln!(out, "{} {}", format!("{:<32}", tool.name).green(), tool.short_description)?;
                }
            }
            Some(DiscoverCommands::Info { server, tool }) => {
                let descriptor = self.index.get_tool_descriptor(server, tool)?;
                write_json(out, descriptor.as_ref())?;
            }
            Some(DiscoverCommands::Search { query }) => {
                let hits = self.index.search(query)?;
                if json {
                    return write_json(out, &hits);
                }
                for hit in &hits {
                    let target = match &hit.tool {
                        Some(tool) => format!("{}/{}", hit.server, tool),
                        None => hit.server.clone(),
                    };
                    writeln!(out, "{} {}", format!("{:<40}", target).green(), hit.description)?;
                }
            }
        }
        Ok(())
    }

    async fn call<W: Write>(&self, server: &str, tool: &str, params: Option<&str>, out: &mut W) -> Result<()> {
        let params = normalize(ParamSource::from_arg(params))?;
        let invoker = StatelessInvoker::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.connector),
            self.config.invoke.clone(),
        );
        let result = invoker.invoke(server, tool, &params).await?;
        write_json(out, &result)
    }

    async fn session<W: Write>(&self, command: &SessionCommands, out: &mut W) -> Result<()> {
        match command {
            SessionCommands::Serve { server } => self.serve(server, out).await,
            SessionCommands::Start { server } => {
                // Fail on unknown servers before spawning anything
                self.resolver.server(server)?;
                let client = self.client().await?;
                let handle = client.start(server).await?;
                write_json(out, &handle)
            }
            SessionCommands::Call { server, tool, params } => {
                let params = normalize(ParamSource::from_arg(params.as_deref()))?;
                // No reconcile here, a dead host has to surface as SessionDied
                let client = SessionClient::new(&self.config, self.launcher.clone())?;
                let result = client.call(server, tool, &params).await?;
                write_json(out, &result)
            }
            SessionCommands::Stop { server } => {
                let client = self.client().await?;
                let stopped = client.stop(server).await?;
                write_json(out, &json!({ "server": server, "stopped": stopped }))
            }
            SessionCommands::List { json } => {
                let client = self.client().await?;
                let listings = client.list().await?;
                if *json {
                    return write_json(out, &listings);
                }
                for listing in &listings {
                    let status = if listing.alive { "alive".green() } else { "dead".red() };
                    writeln!(
                        out,
                        "{:<24} {:<28} pid {:<8} {} calls  {}",
                        listing.record.server,
                        listing.record.id,
                        listing.record.pid,
                        listing.record.call_count,
                        status
                    )?;
                }
                Ok(())
            }
        }
    }

    /// A session client, after clearing out what dead hosts left behind
    async fn client(&self) -> Result<SessionClient> {
        let client = SessionClient::new(&self.config, self.launcher.clone())?;
        match recovery::reconcile(client.store(), client.sockets_dir()).await {
            Ok(report) if !report.is_empty() => debug!("Recovery: {:?}", report),
            Ok(_) => {}
            Err(e) => warn!("Session recovery failed: {}", e),
        }
        Ok(client)
    }

    /// Host `server`'s session until it is stopped.
    ///
    /// The readiness line is the only thing written to `out`; the launching
    /// client reads it and goes away.
    async fn serve<W: Write>(&self, server: &str, out: &mut W) -> Result<()> {
        let socket_path = self.config.state.sockets_dir().join(format!("{}.sock", server));
        let manager = SessionManager::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.connector),
            self.config.session.clone(),
            self.config.invoke.connect_timeout(),
        )
        .with_close_timeout(self.config.invoke.close_timeout())
        .with_persistence(Persistence {
            store: SessionStore::new(self.config.state.sessions_dir())?,
            pid: std::process::id(),
            socket_path: socket_path.clone(),
        });
        let host = SessionHost::new(server, Arc::new(manager), socket_path);

        let (ready_tx, ready_rx) = oneshot::channel();
        let announce = async {
            if let Ok(ready) = ready_rx.await {
                writeln!(out, "{}", serde_json::to_string(&ready)?)?;
                out.flush()?;
            }
            Ok::<(), ToolshedError>(())
        };

        let (exit, announced) = tokio::join!(host.run(ready_tx), announce);
        if let Err(e) = announced {
            warn!("Could not report readiness for {}: {}", server, e);
        }
        let exit = exit?;
        info!("Session host for {} finished: {:?}", server, exit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockConnector, MockReply};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_store(root: &Path) {
        let server = root.join("atlassian");
        fs::create_dir_all(server.join("tools")).unwrap();
        fs::write(
            server.join("index.toml"),
            r#"
[server]
description = "Jira and Confluence"

[transport]
type = "stdio"
command = "atlassian-mcp"

[[tool]]
name = "getJiraIssue"
description = "Get a Jira issue by key"

[[tool]]
name = "createJiraIssue"
description = "Create a Jira issue"
"#,
        )
        .unwrap();
        fs::write(
            server.join("tools").join("getJiraIssue.json"),
            r#"{"description": "Get a Jira issue by key", "input": "GetIssueInput"}"#,
        )
        .unwrap();
    }

    fn create_app(connector: MockConnector) -> (App, TempDir) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("servers");
        write_store(&root);
        let config = Config::default()
            .with_catalogue_root(&root)
            .with_state_dir(temp.path().join("state"));
        let app = App::new(config, HostLauncher::new("/bin/false")).with_connector(Arc::new(connector));
        (app, temp)
    }

    async fn run(app: &App, command: Commands) -> Result<String> {
        let mut out = Vec::new();
        app.run(&command, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_discover_servers() {
        let (app, _temp) = create_app(MockConnector::new());
        let out = run(
            &app,
            Commands::Discover {
                command: None,
                json: true,
            },
        )
        .await
        .unwrap();
        let servers: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(servers, json!([{"name": "atlassian", "tool_count": 2}]));
    }

    #[tokio::test]
    async fn test_discover_list_in_index_order() {
        let (app, _temp) = create_app(MockConnector::new());
        let out = run(
            &app,
            Commands::Discover {
                command: Some(DiscoverCommands::List {
                    server: "atlassian".to_string(),
                }),
                json: false,
            },
        )
        .await
        .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("getJiraIssue") && lines[0].contains("Get a Jira issue by key"));
        assert!(lines[1].contains("createJiraIssue"));
    }

    #[tokio::test]
    async fn test_discover_info_unknown_tool() {
        let (app, _temp) = create_app(MockConnector::new());
        let err = run(
            &app,
            Commands::Discover {
                command: Some(DiscoverCommands::Info {
                    server: "atlassian".to_string(),
                    tool: "deleteJiraIssue".to_string(),
                }),
                json: false,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolshedError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_call_prints_only_payload() {
        let connector = MockConnector::new().with_replies([MockReply::Value(json!({"key": "PROJ-1"}))]);
        let (app, _temp) = create_app(connector.clone());
        let out = run(
            &app,
            Commands::Call {
                server: "atlassian".to_string(),
                tool: "getJiraIssue".to_string(),
                params: Some(r#"{"issueIdOrKey": "PROJ-1"}"#.to_string()),
            },
        )
        .await
        .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(payload, json!({"key": "PROJ-1"}));
        assert_eq!(connector.calls()[0].params, json!({"issueIdOrKey": "PROJ-1"}));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_call_malformed_params_never_connects() {
        let connector = MockConnector::new();
        let (app, _temp) = create_app(connector.clone());
        let err = run(
            &app,
            Commands::Call {
                server: "atlassian".to_string(),
                tool: "getJiraIssue".to_string(),
                params: Some("{not json".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolshedError::MalformedParameters(_)));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_session_start_unknown_server_spawns_nothing() {
        let (app, _temp) = create_app(MockConnector::new());
        let err = run(
            &app,
            Commands::Session {
                command: SessionCommands::Start {
                    server: "nope".to_string(),
                },
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolshedError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn test_session_call_without_start() {
        let (app, _temp) = create_app(MockConnector::new());
        let err = run(
            &app,
            Commands::Session {
                command: SessionCommands::Call {
                    server: "atlassian".to_string(),
                    tool: "getJiraIssue".to_string(),
                    params: Some("{}".to_string()),
                },
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolshedError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn test_session_stop_absent_is_noop() {
        let (app, _temp) = create_app(MockConnector::new());
        let out = run(
            &app,
            Commands::Session {
                command: SessionCommands::Stop {
                    server: "atlassian".to_string(),
                },
            },
        )
        .await
        .unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(result, json!({"server": "atlassian", "stopped": false}));
    }

    #[tokio::test]
    async fn test_session_list_empty() {
        let (app, _temp) = create_app(MockConnector::new());
        let out = run(
            &app,
            Commands::Session {
                command: SessionCommands::List { json: true },
            },
        )
        .await
        .unwrap();
        assert_eq!(out.trim(), "[]");
    }
}
