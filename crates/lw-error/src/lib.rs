//! Unified error taxonomy for loomwork.
//!
//! Every crate in the workspace defines its own `thiserror` enum for the
//! failures specific to it (a missing FIFO, a failed nextflow substitution,
//! an unsatisfiable planner target); at the boundary those enums convert
//! into [`LoomworkError`], which carries a stable [`ErrorCode`], a category,
//! a human message, and an optional source chain. The CLI only ever reports
//! `LoomworkError`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broad family an [`ErrorCode`] belongs to, mirroring the component list in
/// the system overview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Type algebra / bounded-DFS planner failures.
    Planner,
    /// Relay IPC fabric failures (FIFO setup, transport, protocol).
    Relay,
    /// Data movement / transfer dispatcher failures.
    Transfer,
    /// Library store and transform loading failures.
    Library,
    /// Plan/task-bundle serialization failures.
    Plan,
    /// External-runner emission failures.
    Emit,
    /// Agent bootstrap state machine failures.
    Bootstrap,
    /// Configuration errors.
    Config,
    /// I/O errors with no more specific category.
    Io,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Relay => "relay",
            Self::Transfer => "transfer",
            Self::Library => "library",
            Self::Plan => "plan",
            Self::Emit => "emit",
            Self::Bootstrap => "bootstrap",
            Self::Config => "config",
            Self::Io => "io",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code. Serializes to `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No dependency-satisfying plan exists for the requested targets.
    PlannerNoSolution,
    /// Search exceeded the configured horizon before converging.
    PlannerDepthExceeded,
    /// A malformed transform or endpoint definition was encountered.
    PlannerInvalidDefinition,

    /// A FIFO could not be created or opened.
    RelayPipeUnavailable,
    /// A relay request/response envelope failed to parse.
    RelayInvalidEnvelope,
    /// A relay request timed out waiting for a response.
    RelayTimeout,
    /// The requested relay channel does not exist.
    RelayChannelNotFound,

    /// The requested source address or transport combination is invalid.
    TransferInvalidSource,
    /// A transfer failed during execution.
    TransferFailed,
    /// A transfer batch was cancelled before completion.
    TransferCancelled,

    /// A data or transform instance could not be found in the library.
    LibraryNotFound,
    /// A library file failed to load or parse.
    LibraryLoadFailed,
    /// A transform failed to register with the registry.
    LibraryRegistrationFailed,

    /// A plan or task bundle failed to (de)serialize.
    PlanSerializationFailed,

    /// Template substitution for the external runner failed.
    EmitSubstitutionFailed,

    /// The bootstrap state machine reached an invalid transition.
    BootstrapInvalidTransition,

    /// Configuration file or value is invalid.
    ConfigInvalid,

    /// Generic I/O failure.
    IoFailed,

    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            PlannerNoSolution | PlannerDepthExceeded | PlannerInvalidDefinition => {
                ErrorCategory::Planner
            }
            RelayPipeUnavailable | RelayInvalidEnvelope | RelayTimeout | RelayChannelNotFound => {
                ErrorCategory::Relay
            }
            TransferInvalidSource | TransferFailed | TransferCancelled => ErrorCategory::Transfer,
            LibraryNotFound | LibraryLoadFailed | LibraryRegistrationFailed => {
                ErrorCategory::Library
            }
            PlanSerializationFailed => ErrorCategory::Plan,
            EmitSubstitutionFailed => ErrorCategory::Emit,
            BootstrapInvalidTransition => ErrorCategory::Bootstrap,
            ConfigInvalid => ErrorCategory::Config,
            IoFailed => ErrorCategory::Io,
            Internal => ErrorCategory::Internal,
        }
    }

    /// Stable string representation, e.g. `"PLANNER_NO_SOLUTION"`.
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            PlannerNoSolution => "PLANNER_NO_SOLUTION",
            PlannerDepthExceeded => "PLANNER_DEPTH_EXCEEDED",
            PlannerInvalidDefinition => "PLANNER_INVALID_DEFINITION",
            RelayPipeUnavailable => "RELAY_PIPE_UNAVAILABLE",
            RelayInvalidEnvelope => "RELAY_INVALID_ENVELOPE",
            RelayTimeout => "RELAY_TIMEOUT",
            RelayChannelNotFound => "RELAY_CHANNEL_NOT_FOUND",
            TransferInvalidSource => "TRANSFER_INVALID_SOURCE",
            TransferFailed => "TRANSFER_FAILED",
            TransferCancelled => "TRANSFER_CANCELLED",
            LibraryNotFound => "LIBRARY_NOT_FOUND",
            LibraryLoadFailed => "LIBRARY_LOAD_FAILED",
            LibraryRegistrationFailed => "LIBRARY_REGISTRATION_FAILED",
            PlanSerializationFailed => "PLAN_SERIALIZATION_FAILED",
            EmitSubstitutionFailed => "EMIT_SUBSTITUTION_FAILED",
            BootstrapInvalidTransition => "BOOTSTRAP_INVALID_TRANSITION",
            ConfigInvalid => "CONFIG_INVALID",
            IoFailed => "IO_FAILED",
            Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified loomwork error.
///
/// ```
/// use lw_error::{LoomworkError, ErrorCode};
///
/// let err = LoomworkError::new(ErrorCode::RelayTimeout, "no response after 30s")
///     .with_context("channel", "work-7f2a");
/// assert_eq!(err.category().to_string(), "relay");
/// ```
pub struct LoomworkError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl LoomworkError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for LoomworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("LoomworkError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for LoomworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for LoomworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for LoomworkError {
    fn from(e: std::io::Error) -> Self {
        LoomworkError::new(ErrorCode::IoFailed, e.to_string()).with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn display_without_context() {
        let err = LoomworkError::new(ErrorCode::LibraryNotFound, "no such instance");
        assert_eq!(err.to_string(), "[LIBRARY_NOT_FOUND] no such instance");
    }

    #[test]
    fn display_with_context() {
        let err = LoomworkError::new(ErrorCode::RelayTimeout, "timed out")
            .with_context("channel", "work-1");
        let s = err.to_string();
        assert!(s.starts_with("[RELAY_TIMEOUT] timed out"));
        assert!(s.contains("channel"));
    }

    #[test]
    fn category_mapping() {
        assert_eq!(ErrorCode::PlannerNoSolution.category(), ErrorCategory::Planner);
        assert_eq!(ErrorCode::RelayChannelNotFound.category(), ErrorCategory::Relay);
        assert_eq!(ErrorCode::TransferCancelled.category(), ErrorCategory::Transfer);
        assert_eq!(ErrorCode::BootstrapInvalidTransition.category(), ErrorCategory::Bootstrap);
    }

    #[test]
    fn source_chain_preserved() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err = LoomworkError::new(ErrorCode::IoFailed, "read failed").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "missing");
    }

    #[test]
    fn from_io_error() {
        let inner = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: LoomworkError = inner.into();
        assert_eq!(err.code, ErrorCode::IoFailed);
    }

    #[test]
    fn code_serde_roundtrip() {
        let code = ErrorCode::PlannerDepthExceeded;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""PLANNER_DEPTH_EXCEEDED""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }
}
