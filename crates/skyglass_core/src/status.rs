//! Connection status values shared by the connector and the store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status reported at every connector transition. Purely observational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        })
    }
}

/// Lifecycle state of the connector.
///
/// `Idle → Connecting → Connected → Disconnected → (Reconnecting → Connecting)* → GivenUp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting {
        attempt: u32,
    },
    /// Reconnect budget exhausted; only an explicit connect leaves this state
    GivenUp,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GivenUp)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::GivenUp => f.write_str("given up"),
        }
    }
}
