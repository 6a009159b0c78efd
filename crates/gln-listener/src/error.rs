use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connect to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed by peer: {reason}")]
    Closed { reason: String },
    /// Raised by a socket we already closed on purpose.
    #[error("connection already shut down")]
    Shutdown,
    #[error("connection cancelled")]
    Cancelled,
}

impl ConnectionError {
    pub fn receive(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                ConnectionError::Shutdown
            }
            other => ConnectionError::Receive(other.to_string()),
        }
    }

    /// Errors caused by our own close/stop path. They still end the stream
    /// but are not failures worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(self, ConnectionError::Shutdown | ConnectionError::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("notifier endpoint is empty")]
    EmptyEndpoint,
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("unsupported endpoint scheme '{scheme}' (expected ws or wss)")]
    UnsupportedScheme { scheme: String },
    #[error("settings error: {0}")]
    Settings(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("supervisor was stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_socket_errors_are_benign() {
        assert!(ConnectionError::receive(tungstenite::Error::AlreadyClosed).is_benign());
        assert!(ConnectionError::receive(tungstenite::Error::ConnectionClosed).is_benign());
        assert!(ConnectionError::Cancelled.is_benign());
    }

    #[test]
    fn genuine_failures_are_not_benign() {
        assert!(!ConnectionError::Closed {
            reason: "going away".to_string()
        }
        .is_benign());
        assert!(!ConnectionError::Receive("reset by peer".to_string()).is_benign());
        assert!(!ConnectionError::Connect {
            endpoint: "ws://localhost:1".to_string(),
            message: "refused".to_string()
        }
        .is_benign());
    }
}
