/*!
 * Realm Configuration
 *
 * Runtime and per-backend threshold configuration
 */

use super::errors::{RealmError, RealmResult};
use super::limits::*;
use super::types::Size;
use serde::{Deserialize, Serialize};

/// Environment variable capping the simulated process heap (bytes)
pub const HEAP_LIMIT_ENV: &str = "REALM_HEAP_LIMIT";

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on bytes the process heap hands out; `None` is unlimited
    pub heap_limit: Option<Size>,
}

impl RuntimeConfig {
    /// Configuration with a capped process heap (useful for testing)
    pub const fn with_heap_limit(limit: Size) -> Self {
        Self {
            heap_limit: Some(limit),
        }
    }

    /// Read overrides from the environment
    pub fn from_env() -> RealmResult<Self> {
        match std::env::var(HEAP_LIMIT_ENV) {
            Ok(raw) => {
                let limit = raw.trim().parse::<Size>().map_err(|e| {
                    RealmError::invalid(format!("{HEAP_LIMIT_ENV}={raw:?}: {e}"))
                })?;
                Ok(Self::with_heap_limit(limit))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> RealmResult<Self> {
        serde_json::from_str(json).map_err(|e| RealmError::invalid(e.to_string()))
    }
}

/// Bump-and-free realm thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrivialConfig {
    /// Floor of every chunk request made to the parent
    pub min_alloc: Size,
    /// Slack added on top of a request when a new chunk is needed
    pub min_free: Size,
    /// Free-list retention budget before chunks go back to the parent
    pub max_free: Size,
}

impl Default for TrivialConfig {
    fn default() -> Self {
        Self {
            min_alloc: TRIVIAL_MIN_ALLOC,
            min_free: TRIVIAL_MIN_FREE,
            max_free: TRIVIAL_MAX_FREE,
        }
    }
}

impl TrivialConfig {
    /// Retain nothing: every reclaimable chunk returns to the parent
    pub const fn no_retention() -> Self {
        Self {
            min_alloc: TRIVIAL_MIN_ALLOC,
            min_free: TRIVIAL_MIN_FREE,
            max_free: 0,
        }
    }

    pub fn with_min_alloc(mut self, min_alloc: Size) -> Self {
        self.min_alloc = min_alloc;
        self
    }

    pub fn with_min_free(mut self, min_free: Size) -> Self {
        self.min_free = min_free;
        self
    }

    pub fn with_max_free(mut self, max_free: Size) -> Self {
        self.max_free = max_free;
        self
    }

    /// Align thresholds and enforce the floors the chunk layout needs
    pub(crate) fn normalized(self) -> RealmResult<Self> {
        let (min_alloc, min_free) = aligned_thresholds(self.min_alloc, self.min_free)?;
        if min_alloc < TRIVIAL_HEADER_SIZE + CHUNK_HEADER_SIZE + BLOCK_HEADER_SIZE {
            return Err(RealmError::invalid(format!(
                "min_alloc {} cannot hold the realm header",
                self.min_alloc
            )));
        }
        Ok(Self {
            min_alloc,
            min_free,
            max_free: self.max_free,
        })
    }
}

/// Per-thread realm thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    /// Floor of every chunk request made to the parent
    pub min_alloc: Size,
    /// Slack added on top of a request when a new chunk is needed
    pub min_free: Size,
    /// Retention budget of the shared cross-thread pool
    pub max_free: Size,
    /// Retention budget of each thread's own free list
    pub thread_max_free: Size,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            min_alloc: THREADS_MIN_ALLOC,
            min_free: THREADS_MIN_FREE,
            max_free: THREADS_MAX_FREE,
            thread_max_free: THREAD_MAX_FREE,
        }
    }
}

impl ThreadsConfig {
    pub fn with_min_alloc(mut self, min_alloc: Size) -> Self {
        self.min_alloc = min_alloc;
        self
    }

    pub fn with_max_free(mut self, max_free: Size) -> Self {
        self.max_free = max_free;
        self
    }

    pub fn with_thread_max_free(mut self, thread_max_free: Size) -> Self {
        self.thread_max_free = thread_max_free;
        self
    }

    pub(crate) fn normalized(self) -> RealmResult<Self> {
        let (min_alloc, min_free) = aligned_thresholds(self.min_alloc, self.min_free)?;
        let header = THREADS_HEADER_SIZE + THREADS_ACCT_HEADER_SIZE;
        let slot = SLOT_HEADER_SIZE + CHUNK_HEADER_SIZE + BLOCK_HEADER_SIZE;
        if min_alloc < header + CHUNK_HEADER_SIZE + BLOCK_HEADER_SIZE || min_alloc < slot {
            return Err(RealmError::invalid(format!(
                "min_alloc {} cannot hold the realm or slot header",
                self.min_alloc
            )));
        }
        Ok(Self {
            min_alloc,
            min_free,
            ..self
        })
    }
}

fn aligned_thresholds(min_alloc: Size, min_free: Size) -> RealmResult<(Size, Size)> {
    let align = |value: Size, name: &str| {
        checked_align_default(value)
            .ok_or_else(|| RealmError::invalid(format!("{name} {value} overflows when aligned")))
    };
    Ok((
        align(min_alloc, "min_alloc")?,
        align(min_free, "min_free")?.max(CHUNK_HEADER_SIZE),
    ))
}
