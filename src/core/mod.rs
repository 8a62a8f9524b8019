/*!
 * Core Module
 * Fundamental realm types, limits, configuration and error handling
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use config::{RuntimeConfig, ThreadsConfig, TrivialConfig, HEAP_LIMIT_ENV};
pub use errors::*;
pub use types::*;
