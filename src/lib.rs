//! Toolshed - a progressive tool catalogue and invocation runtime
//!
//! Tools live on independently versioned servers. Toolshed lists them without
//! loading their schemas, calls them one-shot over a fresh connection, or keeps
//! a session open across calls for servers that hold state.

pub mod app;
pub mod binding;
pub mod catalogue;
pub mod cli;
pub mod config;
pub mod error;
pub mod id;
pub mod invoker;
pub mod ipc;
pub mod params;
pub mod recovery;
pub mod session;
pub mod transport;
pub mod value;

pub use error::{Result, ToolshedError};
