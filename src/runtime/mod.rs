//! Runtime Module - workflow execution
//!
//! Contains the runtime execution components:
//! - `executor`: runs a single step against the target provider
//! - `controller`: run state machine and background step loop
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `ast` module.

mod controller;
mod executor;

// Re-export public types
pub use controller::{ControlOutcome, PendingSignal, RunController, STOPPED_BY_USER};
pub use executor::StepExecutor;
