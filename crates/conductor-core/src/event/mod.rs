//! Event bus for plan execution lifecycle events.
//!
//! Provides an `EventBus` that distributes `ExecutionEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
