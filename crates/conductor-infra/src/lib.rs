//! Infrastructure layer for Conductor.
//!
//! Contains implementations of the ports defined in `conductor-core`:
//! SQLite and filesystem checkpoint stores, the TOML configuration loader,
//! data-directory resolution, and the built-in `echo` agent.

pub mod agent;
pub mod config;
pub mod filesystem;
pub mod sqlite;
