//! Session lifecycle states

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the session for one server.
///
/// `Absent → Starting → Active → Stopping → Absent`, with `Active → Dead`
/// when a call finds the transport broken. `Dead` is only observable while
/// the slot is being cleared; it resolves to `Absent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Absent,
    Starting,
    Active,
    Stopping,
    Dead,
}

impl SessionState {
    /// Whether calls may be sent
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// States a caller must never be left in
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping | Self::Dead)
    }

    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Absent, Starting)
                | (Starting, Active)
                | (Starting, Absent)
                | (Active, Stopping)
                | (Active, Dead)
                | (Stopping, Absent)
                | (Dead, Absent)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Dead => "dead",
        };
        write!(f, "{}", s)
    }
}

/// Opaque handle identifying a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    pub server: String,
    pub created_at: DateTime<Utc>,
}
