//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - discover: browse the catalogue without loading tool schemas
//! - call: one-shot tool invocation
//! - session: start/call/stop long-lived sessions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Toolshed - discover and call tools on remote tool servers
#[derive(Parser, Debug)]
#[command(name = "toolshed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Schema store root, overriding the configured one
    #[arg(long, global = true, value_name = "DIR")]
    pub catalogue: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List servers, or drill into one
    Discover {
        #[command(subcommand)]
        command: Option<DiscoverCommands>,

        /// Print JSON instead of a listing
        #[arg(long, global = true)]
        json: bool,
    },

    /// Call a tool once over a fresh connection
    Call {
        /// Server name
        server: String,

        /// Tool name
        tool: String,

        /// Parameters: inline JSON, @file, or - for stdin
        params: Option<String>,
    },

    /// Manage sessions that keep a connection open between calls
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

/// Catalogue browsing subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum DiscoverCommands {
    /// List a server's tools
    List {
        /// Server name
        server: String,
    },

    /// Show a tool's full descriptor
    Info {
        /// Server name
        server: String,

        /// Tool name
        tool: String,
    },

    /// Search server and tool names and descriptions
    Search {
        /// Text to look for
        query: String,
    },
}

/// Session subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// Start a session, or return the running one
    Start {
        /// Server name
        server: String,
    },

    /// Call a tool through a running session
    Call {
        /// Server name
        server: String,

        /// Tool name
        tool: String,

        /// Parameters: inline JSON, @file, or - for stdin
        params: Option<String>,
    },

    /// Stop a session
    Stop {
        /// Server name
        server: String,
    },

    /// List persisted sessions
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Host a session in this process
    #[command(hide = true)]
    Serve {
        /// Server name
        server: String,
    },
}
