/*!
 * Memory Module
 * Realm framework, simulated process heap and allocation backends
 */

pub mod address_space;
pub mod backends;
pub mod global;
pub mod realm;
pub mod traits;
pub mod types;

pub(crate) mod chunk;

// Re-export for convenience
pub use address_space::{AddressSpace, AddressSpaceStats};
pub use backends::*;
pub use global::{global, initialize, is_initialized, terminate, GlobalRealm};
pub use realm::{AbortFn, CleanupData, CleanupFn, Runtime};
pub use traits::*;
pub use types::*;
