//! Error types surfaced by the client core

use std::fmt;
use std::time::Duration;

/// Why a `connect` call was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    InvalidUrl(String),
    /// Transport-level failure before the socket opened.
    Refused(String),
    /// No open acknowledgment within the configured window.
    Timeout(Duration),
    /// The pending attempt was abandoned by a newer connect or a disconnect.
    Cancelled,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::InvalidUrl(reason) => write!(f, "invalid server url: {reason}"),
            ConnectError::Refused(reason) => write!(f, "connection refused: {reason}"),
            ConnectError::Timeout(after) => {
                write!(f, "connection timed out after {} ms", after.as_millis())
            }
            ConnectError::Cancelled => write!(f, "connection attempt cancelled"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Failure to build an [`Action`](crate::actions::Action) from a name and a JSON payload.
#[derive(Debug)]
pub enum ActionError {
    UnknownAction(String),
    InvalidPayload {
        action: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::UnknownAction(name) => write!(f, "unknown action '{name}'"),
            ActionError::InvalidPayload { action, source } => {
                write!(f, "invalid payload for {action}: {source}")
            }
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::InvalidPayload { source, .. } => Some(source),
            ActionError::UnknownAction(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum LobbyError {
    InvalidUrl(String),
    Http(reqwest::Error),
    Upstream { status: u16, message: String },
}

impl fmt::Display for LobbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyError::InvalidUrl(reason) => write!(f, "invalid lobby url: {reason}"),
            LobbyError::Http(err) => write!(f, "lobby request failed: {err}"),
            LobbyError::Upstream { status, message } => {
                write!(f, "lobby returned {status}: {message}")
            }
        }
    }
}

impl std::error::Error for LobbyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LobbyError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LobbyError {
    fn from(err: reqwest::Error) -> Self {
        LobbyError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_messages() {
        assert_eq!(
            ConnectError::Timeout(Duration::from_secs(10)).to_string(),
            "connection timed out after 10000 ms"
        );
        assert!(ConnectError::Refused("os error 111".into())
            .to_string()
            .contains("os error 111"));
    }

    #[test]
    fn test_action_error_source() {
        let source = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = ActionError::InvalidPayload {
            action: "JOIN_ROOM".to_string(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("invalid payload for JOIN_ROOM"));
    }

    #[test]
    fn test_lobby_upstream_message() {
        let err = LobbyError::Upstream {
            status: 404,
            message: "room not found".to_string(),
        };
        assert_eq!(err.to_string(), "lobby returned 404: room not found");
    }
}
