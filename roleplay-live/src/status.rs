use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of the live client
///
/// `Error` and `Disconnected` are terminal for a session; only a new
/// `connect` leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// A session exists and holds resources
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Statuses delivered to status-change listeners. `Error` travels
    /// through the error callback instead.
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Disconnected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");

        let status: SessionStatus = serde_json::from_str("\"disconnected\"").unwrap();
        assert_eq!(status, SessionStatus::Disconnected);
        assert_eq!(SessionStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_reported_statuses() {
        assert!(!SessionStatus::Idle.is_reported());
        assert!(SessionStatus::Connecting.is_reported());
        assert!(SessionStatus::Connected.is_reported());
        assert!(SessionStatus::Disconnected.is_reported());
        assert!(!SessionStatus::Error.is_reported());
        assert!(SessionStatus::Connected.is_active());
        assert!(!SessionStatus::Disconnected.is_active());
    }
}
