//! Dispatcher-specific errors.

use lw_error::{ErrorCode, LoomworkError};
use thiserror::Error;

/// Failures from source address parsing, queueing, or transfer execution.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An address could not be parsed for the requested transport.
    #[error("invalid source address [{address}]: {reason}")]
    InvalidSource {
        /// The offending address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A queued transfer violates a transport pairing rule.
    #[error("transfer rejected: {reason}")]
    ValidationFailed {
        /// Why the pairing was rejected.
        reason: String,
    },

    /// A transport tool invocation failed.
    #[error("transfer failed: {reason}")]
    TransferFailed {
        /// Failure detail.
        reason: String,
    },
}

impl From<DispatchError> for LoomworkError {
    fn from(e: DispatchError) -> Self {
        let code = match &e {
            DispatchError::InvalidSource { .. } => ErrorCode::TransferInvalidSource,
            DispatchError::ValidationFailed { .. } => ErrorCode::TransferInvalidSource,
            DispatchError::TransferFailed { .. } => ErrorCode::TransferFailed,
        };
        LoomworkError::new(code, e.to_string())
    }
}
