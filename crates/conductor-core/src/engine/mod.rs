//! Plan execution: graph resolution, step running, scheduling, replanning
//! and checkpointing.
//!
//! - `graph`: validation, readiness and blast-radius queries over a plan.
//! - `step_runner`: one agent call under a timeout, classified on failure.
//! - `executor`: the scheduler loop that owns an `ExecutionContext`.
//! - `replanner`: strategy selection and plan rewrites after failures.
//! - `checkpoint`: snapshot and restore of execution state.

pub mod checkpoint;
pub mod context;
pub mod executor;
pub mod graph;
pub mod replanner;
pub mod step_runner;

pub use checkpoint::{CheckpointError, Checkpointer};
pub use context::ExecutionContext;
pub use executor::{ExecutorError, PlanExecutor, RunHandle};
pub use graph::PlanError;
pub use replanner::Replanner;
pub use step_runner::StepRunner;
