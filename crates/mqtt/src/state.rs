//! Connection lifecycle state shared through watch channels.
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──(CONNACK)──> Connected
//!                                  │                        │
//!                            (connect failed)         (close / error)
//!                                  ▼                        ▼
//!                               Backoff(secs) <─────────────┘
//!                                  │
//!                          (next publish, after wait)
//!                                  ▼
//!                              Connecting
//! ```
//!
//! A connection that is ended on purpose after its publish completes goes
//! back to `Disconnected` without passing through `Backoff`.

use std::fmt;

/// Current state of a device connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection is open and none failed since the last success.
    Disconnected,

    /// A credential was issued and CONNECT is in flight.
    Connecting,

    /// The broker acknowledged the connection.
    Connected,

    /// The last connection closed or failed. The field is the delay, in
    /// seconds and before jitter, that the next attempt will wait.
    Backoff(f64),
}

impl ConnectionState {
    /// Short static name of the state, for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Backoff(_) => "Backoff",
        }
    }

    /// Contextual details: the pending delay for `Backoff`, empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Backoff(seconds) => format!("next attempt in {seconds} seconds"),
            _ => String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the next publish must wait before connecting.
    pub fn is_backing_off(&self) -> bool {
        matches!(self, ConnectionState::Backoff(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "Connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "Connected");
        assert_eq!(ConnectionState::Backoff(2.0).as_str(), "Backoff");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Backoff(4.0).to_string(),
            "Backoff (next attempt in 4 seconds)"
        );
    }

    #[test]
    fn test_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Backoff(1.0).is_backing_off());
        assert!(!ConnectionState::Disconnected.is_backing_off());
    }
}
