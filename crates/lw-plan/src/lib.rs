//! Workflow plan construction and task-bundle serialization.
//!
//! [`plan::generate`] bridges [`lw_library`]'s concrete catalogs into
//! [`lw_types`]'s type algebra and runs [`lw_planner`] over it, reifying the
//! winning solution into a [`plan::WorkflowPlan`]. [`bundle::TaskBundle`] is
//! the on-disk directory form an agent stages and executes a plan from.

#![warn(missing_docs)]

mod bundle;
mod error;
mod plan;

pub use bundle::{TaskBundle, TaskDescriptor};
pub use error::PlanError;
pub use plan::{TargetRequest, WorkflowPlan, WorkflowStep, generate};
