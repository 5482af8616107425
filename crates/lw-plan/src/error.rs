//! Plan construction and (de)serialization errors.

use lw_error::{ErrorCode, LoomworkError};
use thiserror::Error;

/// Failures building or (de)serializing a [`crate::plan::WorkflowPlan`].
#[derive(Debug, Error)]
pub enum PlanError {
    /// The planner found no chain of transforms satisfying the requested
    /// targets.
    #[error("no plan satisfies the requested targets: {reason}")]
    NoSolution {
        /// Detail from the underlying planner failure.
        reason: String,
    },

    /// A requested target type could not be resolved against any given
    /// library.
    #[error("unknown type: {name}")]
    UnknownType {
        /// The missing type name.
        name: String,
    },

    /// A plan or staged task failed to serialize or parse.
    #[error("plan serialization failed: {reason}")]
    SerializationFailed {
        /// Underlying (de)serialization failure detail.
        reason: String,
    },

    /// A step index referenced a step that does not exist.
    #[error("step {index} out of range (plan has {len} steps)")]
    StepOutOfRange {
        /// The requested, 1-based step index.
        index: usize,
        /// Total number of steps in the plan.
        len: usize,
    },
}

impl From<PlanError> for LoomworkError {
    fn from(e: PlanError) -> Self {
        LoomworkError::new(ErrorCode::PlanSerializationFailed, e.to_string())
    }
}
