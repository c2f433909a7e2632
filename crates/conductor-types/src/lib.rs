//! Shared domain types for Conductor.
//!
//! Plans and steps, per-step results and run status, replanning decisions,
//! checkpoint records, engine configuration, and execution events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod plan;
pub mod replan;
