/*!
 * Memory Types
 * Common types for realm memory management
 */

use crate::core::types::{Address, Size};
use serde::{Deserialize, Serialize};

/// Block of memory standing in for a realm's header
///
/// `address` is what the realm hands back to whoever provided it when it is
/// destroyed; the first `header_size` bytes are zero-filled on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmMemory {
    pub address: Address,
    pub header_size: Size,
}

impl RealmMemory {
    pub const fn new(address: Address, header_size: Size) -> Self {
        Self {
            address,
            header_size,
        }
    }
}

/// Per-realm statistics reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmStats {
    pub identity: String,
    /// Bytes handed out to callers and not yet released (8-byte rounded)
    pub outstanding_bytes: Size,
    pub live_blocks: usize,
    /// Chunks currently on used lists (including the self chunk)
    pub used_chunks: usize,
    pub free_chunks: usize,
    /// Bytes parked on free lists for reuse
    pub retained_bytes: Size,
    /// Bytes currently obtained from the parent (or the process heap)
    pub footprint: Size,
    pub thread_count: usize,
}

impl RealmStats {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            ..Default::default()
        }
    }
}
