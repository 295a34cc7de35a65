// src/exec/mod.rs

//! Execution layer.
//!
//! - [`unit`] defines the [`ExecutionUnit`] trait the runtime calls, its
//!   request / output / error types, and [`BlockingUnit`] for synchronous
//!   generators.
//! - [`registry`] maps task keys to units.
//! - [`command`] provides [`CommandUnit`], which runs a shell command per
//!   task using `tokio::process::Command`.

pub mod command;
pub mod registry;
pub mod unit;

pub use command::CommandUnit;
pub use registry::ExecutionRegistry;
pub use unit::{
    BlockingUnit, ExecutionUnit, GenerationError, GenerationOutput, GenerationRequest, UnitFuture,
};
