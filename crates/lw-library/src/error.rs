//! Library-store specific errors.

use lw_error::{ErrorCode, LoomworkError};
use thiserror::Error;

/// Failures from loading, saving, or looking up library contents.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The requested key does not exist in the library's manifest.
    #[error("no such entry: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The library file failed to parse.
    #[error("failed to load library from {path}: {reason}")]
    LoadFailed {
        /// Path that was read.
        path: String,
        /// Parse failure detail.
        reason: String,
    },

    /// The library file failed to write.
    #[error("failed to save library to {path}: {reason}")]
    SaveFailed {
        /// Path that was written.
        path: String,
        /// Write failure detail.
        reason: String,
    },

    /// A transform definition failed to register.
    #[error("transform registration failed: {reason}")]
    RegistrationFailed {
        /// Why registration failed.
        reason: String,
    },
}

impl From<LibraryError> for LoomworkError {
    fn from(e: LibraryError) -> Self {
        let code = match &e {
            LibraryError::NotFound { .. } => ErrorCode::LibraryNotFound,
            LibraryError::LoadFailed { .. } | LibraryError::SaveFailed { .. } => {
                ErrorCode::LibraryLoadFailed
            }
            LibraryError::RegistrationFailed { .. } => ErrorCode::LibraryRegistrationFailed,
        };
        LoomworkError::new(code, e.to_string())
    }
}
