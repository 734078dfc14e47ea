//! IPC Layer - newline-delimited JSON messages between CLI processes and
//! session hosts
//!
//! This module provides:
//! - Message types for requests and responses
//! - The framing codec, shared with stdio tool transports

pub mod codec;
pub mod messages;

pub use codec::NdJsonCodec;
pub use messages::{CallParams, HostReady, Methods, SessionRequest, SessionResponse, WireError};
