//! Built-in agents shipped with the engine.

pub mod echo;

pub use echo::EchoAgent;
