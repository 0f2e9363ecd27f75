//! Router errors and the connection-loss classifier.

use std::fmt;
use thiserror::Error;

/// Errors surfaced by the router.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The configuration handed to [`Router::connect`](crate::Router::connect)
    /// is unusable. Fatal at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A clock was assembled from incomplete or malformed input.
    #[error("invalid clock: {0}")]
    InvalidClock(String),
    /// A primary-only operation had no configured fallback and the primary
    /// is unreachable. The primary slot has been cleared; the next attempt
    /// retries a fresh connection.
    #[error("primary unavailable")]
    PrimaryUnavailable,
    /// An underlying driver failure the router does not recognize as
    /// connection loss, passed through verbatim.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// A raw failure reported by a collaborator connection, carrying the
/// vendor error code when the driver exposes one.
#[derive(Error, Debug)]
pub struct DriverError {
    /// Vendor-specific error code, if any.
    pub code: Option<u32>,
    /// Human-readable failure description.
    pub message: String,
}

impl DriverError {
    /// Creates a driver error without a vendor code.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Creates a driver error carrying a vendor error code.
    pub fn with_code<S: Into<String>>(code: u32, message: S) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "driver error {}: {}", code, self.message),
            None => write!(f, "driver error: {}", self.message),
        }
    }
}

/// Classification of a raw driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection to the server is gone; the call may be retried on
    /// another node.
    ConnectionLost,
    /// Anything else. Never masked, never retried.
    Other,
}

// MySQL client error codes that indicate a lost server connection:
// CR_CONNECTION_ERROR, CR_CONN_HOST_ERROR, CR_SERVER_GONE_ERROR,
// CR_SERVER_LOST.
const CONNECTION_LOST_CODES: [u32; 4] = [2002, 2003, 2006, 2013];

/// Decides whether a driver failure means the connection to the server
/// was lost.
pub fn classify(err: &DriverError) -> ErrorKind {
    match err.code {
        Some(code) if CONNECTION_LOST_CODES.contains(&code) => ErrorKind::ConnectionLost,
        _ => ErrorKind::Other,
    }
}
