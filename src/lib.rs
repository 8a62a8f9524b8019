/*!
 * Realm Allocator Library
 * Hierarchical memory realms with pluggable allocation backends
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::types::*;
pub use crate::core::{RuntimeConfig, ThreadsConfig, TrivialConfig};
pub use memory::{
    Backend, BlocksBackend, CleanupData, CleanupFn, GlobalRealm, RealmCtx, RealmMemory, RealmStats,
    Runtime, StandardBackend, ThreadsBackend, TrackingBackend, TrivialBackend,
};
pub use monitoring::init_tracing;
