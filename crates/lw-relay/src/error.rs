//! Relay-specific errors.

use lw_error::{ErrorCode, LoomworkError};
use thiserror::Error;

/// Failures from FIFO setup, envelope parsing, or request/response
/// transactions.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A FIFO could not be created or opened at the given path.
    #[error("pipe unavailable at {path}: {reason}")]
    PipeUnavailable {
        /// The FIFO path.
        path: String,
        /// Underlying OS error.
        reason: String,
    },

    /// A client failed to connect to a server within its timeout.
    #[error("timed out connecting to {path}")]
    ConnectTimeout {
        /// The server FIFO path that never appeared free.
        path: String,
    },

    /// A request/response envelope failed to parse.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope {
        /// Parse failure detail.
        reason: String,
    },

    /// A transaction did not receive a matching response in time.
    #[error("request timed out waiting for a response")]
    Timeout,

    /// The server rejected a request (non-2xx status).
    #[error("request failed with status {status}: {message}")]
    RequestFailed {
        /// The response status code.
        status: u16,
        /// The response's error message, if any.
        message: String,
    },

    /// The requested relay channel does not exist.
    #[error("no such channel: {channel}")]
    ChannelNotFound {
        /// The missing channel id.
        channel: String,
    },
}

impl From<RelayError> for LoomworkError {
    fn from(e: RelayError) -> Self {
        let code = match &e {
            RelayError::PipeUnavailable { .. } => ErrorCode::RelayPipeUnavailable,
            RelayError::ConnectTimeout { .. } | RelayError::Timeout => ErrorCode::RelayTimeout,
            RelayError::InvalidEnvelope { .. } => ErrorCode::RelayInvalidEnvelope,
            RelayError::RequestFailed { .. } => ErrorCode::RelayInvalidEnvelope,
            RelayError::ChannelNotFound { .. } => ErrorCode::RelayChannelNotFound,
        };
        LoomworkError::new(code, e.to_string())
    }
}
