/*!
 * Core Types
 * Common types used across the realm framework
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address type for simulated memory operations
pub type Address = usize;

/// Size type for memory operations
pub type Size = usize;

/// Cleanup type tag (`0` matches every type in unregister/run queries)
pub type CleanupType = i32;

/// Stable handle to a realm in the realm table
///
/// The generation counter makes handles to destroyed (or reset-detached)
/// realms stale instead of silently aliasing a newer realm in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RealmId {
    index: u32,
    generation: u32,
}

impl RealmId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "realm#{}.{}", self.index, self.generation)
    }
}

/// Backend operations a realm may or may not provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Allocate,
    ZeroedAllocate,
    Resize,
    Release,
    Reset,
    PreDestroy,
    Destroy,
    Lock,
    Unlock,
    ThreadRegister,
    ThreadUnregister,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Allocate => "allocate",
            Operation::ZeroedAllocate => "zeroed_allocate",
            Operation::Resize => "resize",
            Operation::Release => "release",
            Operation::Reset => "reset",
            Operation::PreDestroy => "pre_destroy",
            Operation::Destroy => "destroy",
            Operation::Lock => "lock",
            Operation::Unlock => "unlock",
            Operation::ThreadRegister => "thread_register",
            Operation::ThreadUnregister => "thread_unregister",
        };
        f.write_str(name)
    }
}
