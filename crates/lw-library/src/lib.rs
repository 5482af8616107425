//! Typed data libraries and the transform registry they feed the planner.
//!
//! [`types`] holds the ontology ([`DataType`]/[`DataTypeLibrary`]);
//! [`instance`] holds concrete files recorded against it
//! ([`DataInstance`]/[`DataInstanceLibrary`]); [`transform`] holds loadable
//! transform definitions and the [`TransformRegistry`] handle they register
//! against.

#![warn(missing_docs)]

mod error;
mod instance;
mod transform;
mod types;

pub use error::LibraryError;
pub use instance::{AddItem, DataInstance, DataInstanceLibrary, OnExist};
pub use transform::{
    ExecutionContext, ExecutionResult, Protocol, TransformDefinitionFn, TransformInstance,
    TransformInstanceLibrary, TransformRegistry, load_definition, transform_key,
};
pub use types::{DataType, DataTypeLibrary, PropertyValue};
