//! Filesystem adapters for Conductor.
//!
//! Provides the JSON-file checkpoint store and data directory resolution.

pub mod checkpoint;

use std::path::PathBuf;

pub use checkpoint::FileCheckpointStore;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `CONDUCTOR_DATA_DIR` environment variable
/// 2. `~/.conductor` under the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONDUCTOR_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".conductor");
    }

    // Last resort: current directory
    PathBuf::from(".conductor")
}
