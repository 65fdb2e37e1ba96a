//! Checker configuration model and shared check types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Wire protocol used by the HTTP GET checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain-text HTTP.
    Http,
    /// HTTP over TLS.
    Ssl,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP_GET"),
            Protocol::Ssl => write!(f, "SSL_GET"),
        }
    }
}

/// One URL fetched and validated during a check cycle.
///
/// A target passes when every configured criterion matches; a target with no
/// criterion configured always fails its evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTarget {
    /// Request path sent in the GET line.
    pub path: String,

    /// Expected MD5 digest of the response body, 32 lowercase hex chars.
    #[serde(default)]
    pub digest: Option<String>,

    /// Expected HTTP status code.
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl CheckTarget {
    /// Target validated by status code only.
    pub fn with_status(path: impl Into<String>, status_code: u16) -> Self {
        Self {
            path: path.into(),
            digest: None,
            status_code: Some(status_code),
        }
    }

    /// Target validated by body digest only.
    pub fn with_digest(path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: Some(digest.into()),
            status_code: None,
        }
    }
}

/// Connection options shared by every probe of one checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Destination address of the backend.
    pub address: SocketAddr,

    /// Timeout applied to each connect/handshake/send/read step.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Host header override.
    #[serde(default)]
    pub virtualhost: Option<String>,
}

/// Scheduling and failover policy for one monitored backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Regular delay between checks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Consecutive failures tolerated before the backend is marked down.
    /// The backend goes down after `max_retries + 1` failed attempts.
    pub max_retries: u32,

    /// Delay before a retry attempt.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_retries: 1,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Liveness state of a real server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Up,
    Down,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Up => write!(f, "UP"),
            ServerState::Down => write!(f, "DOWN"),
        }
    }
}

/// Fire-and-forget alert emitted on a liveness transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Backend identity, `address:port`.
    pub server: String,
    pub previous: ServerState,
    pub current: ServerState,
    pub reason: String,
}

/// Errors raised while driving a single probe connection.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("error connecting server: {0}")]
    Connect(#[source] std::io::Error),

    #[error("connection timeout")]
    ConnectTimeout,

    #[error("SSL handshake error: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("SSL handshake timeout")]
    HandshakeTimeout,

    #[error("cannot send get request: {0}")]
    Send(#[source] std::io::Error),

    #[error("write timeout")]
    WriteTimeout,

    #[error("cannot receive data: {0}")]
    Recv(#[source] std::io::Error),

    #[error("read timeout")]
    ReadTimeout,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Why a check attempt failed.
///
/// Every variant routes through the same retry policy; the rendered message
/// becomes the alert reason when retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum CheckFailure {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("empty buffer received")]
    EmptyResponse,

    #[error("HTTP status code mismatch: expected {expected}, got {actual}")]
    StatusMismatch { expected: u16, actual: u16 },

    #[error("MD5 digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("no success criteria configured")]
    NoCriteria,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_state_display() {
        assert_eq!(ServerState::Up.to_string(), "UP");
        assert_eq!(ServerState::Down.to_string(), "DOWN");
    }

    #[test]
    fn protocol_display() {
        assert_eq!(Protocol::Http.to_string(), "HTTP_GET");
        assert_eq!(Protocol::Ssl.to_string(), "SSL_GET");
    }

    #[test]
    fn check_failure_messages() {
        let failure = CheckFailure::StatusMismatch {
            expected: 200,
            actual: 503,
        };
        assert_eq!(
            failure.to_string(),
            "HTTP status code mismatch: expected 200, got 503"
        );

        let failure = CheckFailure::EmptyResponse;
        assert_eq!(failure.to_string(), "empty buffer received");
    }
}
