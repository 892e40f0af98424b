//! Shared error type across relayMux crates.

use thiserror::Error;

/// Stable error codes surfaced to embedding applications (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed wire frame.
    Malformed,
    /// Response for an unknown or already-consumed correlation id.
    OrphanResponse,
    /// No correlation ids left; every id is simultaneously outstanding.
    IdSpaceExhausted,
    /// No handler registered for a receiver URL.
    UnknownReceiver,
    /// Connection dropped, or was never established.
    Disconnected,
    /// The session is shutting down.
    Closing,
    /// Internal client error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and admin surfaces.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Malformed => "MALFORMED",
            ErrorCode::OrphanResponse => "ORPHAN_RESPONSE",
            ErrorCode::IdSpaceExhausted => "ID_SPACE_EXHAUSTED",
            ErrorCode::UnknownReceiver => "UNKNOWN_RECEIVER",
            ErrorCode::Disconnected => "DISCONNECTED",
            ErrorCode::Closing => "CLOSING",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Unified error type used by core and the client session.
///
/// Only `IdSpaceExhausted`, `Disconnected`, and `Closing` ever surface from a
/// `send_message` call; framing and correlation anomalies are logged and the
/// offending frame is dropped without interrupting the session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("orphan response for correlation id {0}")]
    OrphanResponse(u64),
    #[error("correlation id space exhausted")]
    IdSpaceExhausted,
    #[error("unknown receiver: {0}")]
    UnknownReceiver(String),
    #[error("session disconnected")]
    Disconnected,
    #[error("session closing")]
    Closing,
    #[error("internal: {0}")]
    Internal(String),
}

impl RelayError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Malformed(_) => ErrorCode::Malformed,
            RelayError::OrphanResponse(_) => ErrorCode::OrphanResponse,
            RelayError::IdSpaceExhausted => ErrorCode::IdSpaceExhausted,
            RelayError::UnknownReceiver(_) => ErrorCode::UnknownReceiver,
            RelayError::Disconnected => ErrorCode::Disconnected,
            RelayError::Closing => ErrorCode::Closing,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }
}
