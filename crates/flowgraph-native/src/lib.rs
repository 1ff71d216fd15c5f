//! Process-level helpers for embedding `flowgraph-core` in a standalone
//! binary: structured logging setup and a JSON-backed runtime config.

pub mod config;
pub mod logging;

pub use config::{ConfigError, RuntimeConfig};
pub use logging::init_logging;
