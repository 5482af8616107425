//! Emission failures.

use lw_error::{ErrorCode, LoomworkError};
use thiserror::Error;

/// Failures turning a [`lw_plan::WorkflowPlan`] into an external-runner
/// script or config.
#[derive(Debug, Error)]
pub enum EmitError {
    /// A `<name>` template token had no matching `config["nextflow"][name]`
    /// value.
    #[error("no nextflow config value for template token <{name}>")]
    SubstitutionFailed {
        /// The unresolved token name.
        name: String,
    },
}

impl From<EmitError> for LoomworkError {
    fn from(e: EmitError) -> Self {
        LoomworkError::new(ErrorCode::EmitSubstitutionFailed, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_loomwork_error() {
        let e: LoomworkError = EmitError::SubstitutionFailed { name: "threads".into() }.into();
        assert_eq!(e.code, ErrorCode::EmitSubstitutionFailed);
    }
}
