//! CLI module for toolshed - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for catalogue discovery,
//! stateless calls and session management.

pub mod commands;

pub use commands::{Cli, Commands, DiscoverCommands, SessionCommands};
