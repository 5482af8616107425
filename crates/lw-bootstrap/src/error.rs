//! Bootstrap state machine failures.

use lw_error::{ErrorCode, LoomworkError};
use lw_plan::PlanError;
use thiserror::Error;

/// Failures from any phase of the bootstrap sequence
/// (`WAITING_FOR_RELAY` → `LOADING_TASK` → `RESOLVING_STEP` → `EXECUTING`).
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The relay's main connection FIFO never appeared within the
    /// configured number of poll attempts.
    #[error("server not started: {path} not found after {attempts} attempts")]
    RelayNotStarted {
        /// The FIFO path polled for.
        path: String,
        /// Number of one-second polls attempted.
        attempts: u32,
    },

    /// The task bundle failed to load even after riding out the staging
    /// race with backoff.
    #[error("failed to load task bundle: {reason}")]
    TaskLoadFailed {
        /// Underlying load failure detail.
        reason: String,
    },

    /// The requested step index does not exist in the loaded plan.
    #[error("cannot resolve step {index}: {source}")]
    StepUnresolved {
        /// The requested, 1-based step index.
        index: usize,
        /// The underlying plan error.
        #[source]
        source: PlanError,
    },

    /// The step's transform definition could not be found in the supplied
    /// transform library.
    #[error("transform not found: {path}")]
    TransformNotFound {
        /// The relative path looked up.
        path: String,
    },

    /// A bound input or output instance could not be resolved to a file
    /// under any library in the task bundle.
    #[error("could not resolve data instance {name} ({source})")]
    InstanceUnresolved {
        /// The step-local endpoint name.
        name: String,
        /// The instance's declared relative source path.
        source: String,
    },

    /// The relay connection needed to bind `ExecutionContext.shell` could
    /// not be established even though the relay socket was already found
    /// present by `WAITING_FOR_RELAY`.
    #[error("failed to connect to relay: {reason}")]
    RelayConnectFailed {
        /// Underlying relay error detail.
        reason: String,
    },
}

impl From<lw_relay::RelayError> for BootstrapError {
    fn from(e: lw_relay::RelayError) -> Self {
        BootstrapError::RelayConnectFailed { reason: e.to_string() }
    }
}

impl From<BootstrapError> for LoomworkError {
    fn from(e: BootstrapError) -> Self {
        LoomworkError::new(ErrorCode::BootstrapInvalidTransition, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_loomwork_error() {
        let e: LoomworkError = BootstrapError::RelayNotStarted { path: "main.in".into(), attempts: 10 }.into();
        assert_eq!(e.code, ErrorCode::BootstrapInvalidTransition);
    }
}
