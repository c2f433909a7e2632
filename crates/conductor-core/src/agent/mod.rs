//! Agent capability port.
//!
//! - `capability`: the `Agent` trait plus request/output/error types
//! - `box_agent`: type-erased `BoxAgent` for dynamic dispatch
//! - `registry`: name-indexed `AgentRegistry` handed to the executor

pub mod box_agent;
pub mod capability;
pub mod registry;

pub use box_agent::BoxAgent;
pub use capability::{Agent, AgentError, AgentOutput, AgentRequest};
pub use registry::AgentRegistry;
