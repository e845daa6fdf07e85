use std::time::Duration;

use thiserror::Error;

/// Errors produced by the STOMP server engine.
///
/// Fatal variants (see [`StompError::is_fatal`]) end the connection after a
/// best-effort ERROR frame; the others are reported to the caller and the
/// connection stays open.
#[derive(Error, Debug)]
pub enum StompError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed frame, frame illegal in the current state, or a frame that
    /// exceeds the configured limits
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Duplicate subscription or transaction id on one connection
    #[error("{kind} '{id}' is already registered")]
    Conflict { kind: &'static str, id: String },
    /// Unknown subscription, transaction or message id
    #[error("unknown {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },
    /// A configured per-connection limit was reached
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    /// Credentials refused during CONNECT
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),
    /// No inbound activity within the negotiated window
    #[error("heartbeat timeout: no client activity for {0:?}")]
    HeartbeatTimeout(Duration),
    /// The destination factory declined to create the destination
    #[error("destination '{0}' rejected")]
    DestinationRejected(String),
}

impl StompError {
    /// Whether this error must terminate the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StompError::Io(_)
                | StompError::Protocol(_)
                | StompError::AuthenticationRejected(_)
                | StompError::HeartbeatTimeout(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StompError>;
