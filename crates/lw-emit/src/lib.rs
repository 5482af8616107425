//! Deterministic external-runner script emission.
//!
//! [`emit_workflow`] turns a [`lw_plan::WorkflowPlan`] into a nextflow-style
//! workflow script; [`render_preset`] fills in a config preset's `<name>`
//! template tokens from a `config["nextflow"]` table.

#![warn(missing_docs)]

mod error;
mod preset;
mod workflow;

pub use error::EmitError;
pub use preset::render_preset;
pub use workflow::emit_workflow;
