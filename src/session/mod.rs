//! Sessions - long-lived transports that survive across calls
//!
//! - `manager`: in-process state machine owning one transport per server
//! - `host`: process serving one manager over a Unix socket
//! - `client`: CLI side, reaching hosts through persisted records
//! - `record`: the records themselves, with their file locks

mod client;
mod host;
mod manager;
mod record;
mod state;

pub use client::{HostLauncher, SessionClient, SessionListing, acquire, probe, process_alive};
pub use host::{HostExit, SessionHost, request};
pub use manager::{Persistence, SessionManager};
pub use record::{RecordLock, SessionRecord, SessionStore};
pub use state::{SessionHandle, SessionState};
