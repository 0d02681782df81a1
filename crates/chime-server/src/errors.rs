//! Server error types.

use chime_core::{ConnectionId, ErrorCode, GenerationError};
use thiserror::Error;

/// The connection's outbound queue is closed; the connection is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("outbound queue closed")]
pub struct QueueClosed;

/// Failure of a bounded-time enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue stayed full past the timeout.
    #[error("outbound queue full")]
    Timeout,
    /// The queue is closed.
    #[error("outbound queue closed")]
    Closed,
}

/// Connection registry failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A connection with this id is already registered.
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),
    /// No connection with this id is registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),
    /// The connection's queue stayed full past the send timeout.
    #[error("send to {0} timed out")]
    SendTimeout(ConnectionId),
    /// The connection was closing and no longer accepts frames.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Why a user turn failed.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Empty text or missing conversation id.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The generation collaborator failed.
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    /// The connection went away mid-turn.
    #[error(transparent)]
    ConnectionClosed(#[from] QueueClosed),
}

impl TurnError {
    /// Code to report to the client, if the client can still be reached.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::InvalidInput(_) => Some(ErrorCode::InvalidInput),
            Self::Generation(_) => Some(ErrorCode::AiError),
            Self::ConnectionClosed(_) => None,
        }
    }
}

/// Server startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
