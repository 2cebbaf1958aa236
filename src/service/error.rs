//! Error type for request and message handlers.

use thiserror::Error;

/// Error returned by a service request handler or a message callback.
///
/// A service answers a failed request with an `ErrorResponse` carrying
/// [`HandlerError::error_code`] and the error text.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic rejected the request (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),
    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Payload decode / deserialization failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// Missing or invalid credentials in the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The handler cannot serve right now.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// Application-defined code and message, passed through as-is.
    ///
    /// A zero code is reported as the generic failure code instead.
    #[error("{message}")]
    Custom { code: i32, message: String },
    /// Other error.
    #[error("handler error: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Build an application-defined error.
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        HandlerError::Custom {
            code,
            message: message.into(),
        }
    }

    /// Code written into the `ErrorResponse` for this error. Never zero.
    pub fn error_code(&self) -> i32 {
        match self {
            HandlerError::DecodeFailed(_) => 400,
            HandlerError::Unauthorized(_) => 401,
            HandlerError::NotFound(_) => 404,
            HandlerError::Rejected(_) => 422,
            HandlerError::Other(_) | HandlerError::Panicked(_) => 500,
            HandlerError::Unavailable(_) => 503,
            HandlerError::Custom { code: 0, .. } => 500,
            HandlerError::Custom { code, .. } => *code,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl From<bitcode::Error> for HandlerError {
    fn from(err: bitcode::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}
