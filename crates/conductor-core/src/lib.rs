//! Plan execution engine for Conductor.
//!
//! This crate defines the scheduler, replanner and checkpointer together with
//! the "ports" (agent and checkpoint store traits) that the infrastructure
//! layer implements. It depends only on `conductor-types` -- never on
//! `conductor-infra` or any database/IO crate.

pub mod agent;
pub mod cost;
pub mod engine;
pub mod event;
pub mod repository;

pub use engine::executor::{ExecutorError, PlanExecutor, RunHandle};
