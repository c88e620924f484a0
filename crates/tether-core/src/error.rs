//! Error types for the tether bridge.
//!
//! The propagation policy is asymmetric: wire-level malformations
//! (`MalformedMessage`, `ShapeMismatch`, `UnknownHandle`) never reach
//! application callers - the enclosing frame is dropped silently. Only
//! semantically well-formed rejections and connection closure surface as
//! caller-visible failures.

use thiserror::Error;

/// Main error type for the tether bridge.
///
/// `Clone` is required because teardown rejects every outstanding request
/// with the same `ConnectionClosed` value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// An inbound frame failed to parse or failed shape validation.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// A cast tree's container shape disagrees with its value's.
    #[error("expected cast to be {expected}")]
    ShapeMismatch { expected: &'static str },

    /// A handle leaf named a callback id with no registered entry.
    #[error("unknown callback handle {id}")]
    UnknownHandle { id: u64 },

    /// A well-formed `callback_request` named a local callback that does
    /// not exist. The display string is the exact wire reason.
    #[error("Callback not found")]
    CallbackNotFound,

    /// The peer explicitly rejected a request.
    #[error("rejected by peer: {}", reason.as_deref().unwrap_or("no reason given"))]
    Rejected { reason: Option<String> },

    /// The transport closed while the request was outstanding, or an
    /// outbound operation was attempted on a closed session. The display
    /// string is the fixed teardown reason.
    #[error("connection closed")]
    ConnectionClosed,

    /// A local callback invocation failed; the message becomes the
    /// `callback_reject` reason sent to the peer.
    #[error("{message}")]
    Callback { message: String },
}

impl BridgeError {
    /// Create a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        BridgeError::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Create a `Callback` error from a failure message.
    pub fn callback(message: impl Into<String>) -> Self {
        BridgeError::Callback {
            message: message.into(),
        }
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
