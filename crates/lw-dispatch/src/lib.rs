//! Source addressing and batched data movement across transports.
//!
//! A [`Source`] names a location plus the transport used to reach it.
//! [`Logistics`] queues transfer pairs, validates transport pairing rules at
//! enqueue time, and executes them grouped by transport so bulk transfers
//! (`LOCAL_BATCH`, `REMOTE_SHELL`, `HTTP`) run concurrently with cheap local
//! `DIRECT`/`SYMLINK` copies.

#![deny(unsafe_code)]

mod error;
mod logistics;
mod source;

pub use error::DispatchError;
pub use logistics::{Logistics, TransferResult, validate_pair};
pub use source::{BatchEndpoint, Source, SourceType};
