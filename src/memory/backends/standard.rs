/*!
 * Standard Realm
 * Parentless, non-tracking root serving every request from the process heap
 */

use crate::core::errors::RealmResult;
use crate::core::limits::STANDARD_HEADER_SIZE;
use crate::core::types::{Address, Operation, RealmId, Size};
use crate::memory::realm::Runtime;
use crate::memory::traits::{Backend, RealmCtx};
use crate::memory::types::{RealmMemory, RealmStats};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const STANDARD_IDENTITY: &str = "STANDARD";

/// Process heap pass-through
#[derive(Debug, Default)]
pub struct StandardBackend {
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl StandardBackend {
    /// Create a root realm; its header lives in its own heap region
    pub fn create(runtime: &Runtime) -> RealmResult<RealmId> {
        let home = runtime.memory().map(STANDARD_HEADER_SIZE)?;
        let backend = Arc::new(Self::default());
        let realm = runtime.create_realm(
            None,
            Some(RealmMemory::new(home, STANDARD_HEADER_SIZE)),
            backend,
        )?;
        runtime.validate(realm)?;
        Ok(realm)
    }

    fn track(&self, size: Size) {
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
    }
}

impl Backend for StandardBackend {
    fn identity(&self) -> &'static str {
        STANDARD_IDENTITY
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::Allocate | Operation::ZeroedAllocate | Operation::Resize | Operation::Release
        )
    }

    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        let address = ctx.memory().map(size)?;
        self.track(size);
        Ok(Some(address))
    }

    fn zeroed_allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        // Fresh regions are already zero-filled
        self.allocate(ctx, size)
    }

    fn resize(&self, ctx: &RealmCtx<'_>, address: Address, size: Size) -> RealmResult<Option<Address>> {
        let old = ctx.memory().region_size(address)?;
        let moved = ctx.memory().remap(address, size)?;
        self.live_bytes.fetch_sub(old, Ordering::Relaxed);
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(Some(moved))
    }

    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        let size = ctx.memory().unmap(address)?;
        // On destroy the realm is already gone and this is its own header
        if ctx.runtime().contains(ctx.realm()) {
            self.live_blocks.fetch_sub(1, Ordering::Relaxed);
            self.live_bytes.fetch_sub(size, Ordering::Relaxed);
        }
        Ok(())
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        let live_bytes = self.live_bytes.load(Ordering::Relaxed);
        RealmStats {
            outstanding_bytes: live_bytes,
            live_blocks: self.live_blocks.load(Ordering::Relaxed),
            footprint: live_bytes + STANDARD_HEADER_SIZE,
            ..RealmStats::new(STANDARD_IDENTITY)
        }
    }
}
