//! Error types surfaced by the client.
//!
//! Each layer has its own error enum: [`DecodeError`](crate::message::DecodeError)
//! for the codec, [`TransportError`](crate::transport::TransportError) for the
//! transport collaborator and [`HandlerError`](crate::service::HandlerError) for
//! user handlers. [`ClientError`] is what public client operations return.

use std::time::Duration;

use thiserror::Error;

use crate::message::DecodeError;
use crate::service::HandlerError;
use crate::transport::TransportError;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An inbound payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// No response arrived for a request before its deadline.
    #[error("request {message_id} timed out after {timeout:?}")]
    RequestTimeout {
        message_id: String,
        timeout: Duration,
    },

    /// The caller passed an argument the client cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A user handler failed.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// The operation needs a connected transport.
    #[error("transport is not connected")]
    NotConnected,

    /// The transport rejected or failed an operation.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The fabric answered a service (un)registration with an error response.
    #[error("service registration failed ({code}): {message}")]
    ServiceRegistration { code: i32, message: String },

    /// The client was destroyed while the operation was outstanding.
    #[error("client has been destroyed")]
    ClientDestroyed,

    /// A background thread could not be started.
    #[error("failed to spawn client thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ClientError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for the error raised when a request outlives its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::RequestTimeout { .. })
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => ClientError::NotConnected,
            other => ClientError::Transport(other),
        }
    }
}
