/*!
 * Tracking Realm
 *
 * Every allocation is its own parent block, remembered until it is released
 * or the realm is reset. The canonical tracking ancestor for non-tracking
 * children.
 */

use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::{TRACKING_HEADER_SIZE, TRACKING_NODE_SIZE};
use crate::core::types::{Address, Operation, RealmId, Size};
use crate::memory::realm::Runtime;
use crate::memory::traits::{Backend, RealmCtx};
use crate::memory::types::{RealmMemory, RealmStats};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub const TRACKING_IDENTITY: &str = "TRACKING";

pub struct TrackingBackend {
    home: Address,
    /// Parent block address -> requested size
    nodes: DashMap<Address, Size, RandomState>,
}

impl TrackingBackend {
    pub fn create(runtime: &Runtime, parent: Option<RealmId>) -> RealmResult<RealmId> {
        let home = runtime.upstream_zeroed_allocate(parent, TRACKING_HEADER_SIZE)?;
        let backend = Arc::new(Self {
            home,
            nodes: DashMap::with_hasher(RandomState::new()),
        });
        let memory = RealmMemory::new(home, TRACKING_HEADER_SIZE);
        let realm = runtime.create_homed_realm(parent, memory, backend)?;
        runtime.validate(realm)?;
        debug!(%realm, "tracking realm created");
        Ok(realm)
    }

    /// Parent block size for a `size`-byte request plus its size node
    fn node_size(ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Size> {
        size.checked_add(TRACKING_NODE_SIZE)
            .ok_or_else(|| RealmError::out_of_memory(size, ctx.realm().to_string()))
    }

    fn insert(&self, ctx: &RealmCtx<'_>, node: Address, size: Size) -> RealmResult<Address> {
        ctx.memory().write_u64(node, size as u64)?;
        self.nodes.insert(node, size);
        Ok(node + TRACKING_NODE_SIZE)
    }

    fn node_of(&self, address: Address) -> RealmResult<Address> {
        let node = address.checked_sub(TRACKING_NODE_SIZE).unwrap_or(0);
        if self.nodes.contains_key(&node) {
            Ok(node)
        } else {
            Err(RealmError::invalid(format!(
                "0x{:x} was not allocated by this tracking realm",
                address
            )))
        }
    }
}

impl Backend for TrackingBackend {
    fn identity(&self) -> &'static str {
        TRACKING_IDENTITY
    }

    fn supports(&self, operation: Operation) -> bool {
        !matches!(
            operation,
            Operation::Lock | Operation::Unlock | Operation::ThreadRegister | Operation::ThreadUnregister
        )
    }

    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        let node = ctx.parent_allocate(Self::node_size(ctx, size)?)?;
        self.insert(ctx, node, size).map(Some)
    }

    fn zeroed_allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        let node = ctx.parent_zeroed_allocate(Self::node_size(ctx, size)?)?;
        self.insert(ctx, node, size).map(Some)
    }

    fn resize(&self, ctx: &RealmCtx<'_>, address: Address, size: Size) -> RealmResult<Option<Address>> {
        let node = self.node_of(address)?;
        let old = self.nodes.get(&node).map(|entry| *entry).unwrap_or(0);
        let fresh = ctx.parent_allocate(Self::node_size(ctx, size)?)?;
        ctx.memory()
            .copy(address, fresh + TRACKING_NODE_SIZE, old.min(size))?;
        self.nodes.remove(&node);
        ctx.parent_release(node)?;
        self.insert(ctx, fresh, size).map(Some)
    }

    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        let node = self.node_of(address)?;
        self.nodes.remove(&node);
        ctx.parent_release(node)
    }

    fn reset(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let nodes: Vec<Address> = self.nodes.iter().map(|entry| *entry.key()).collect();
        for node in nodes {
            self.nodes.remove(&node);
            ctx.parent_release(node)?;
        }
        Ok(())
    }

    fn pre_destroy(&self, _ctx: &RealmCtx<'_>) -> RealmResult<()> {
        Ok(())
    }

    fn destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        self.reset(ctx)?;
        ctx.parent_release(self.home)
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        let outstanding: Size = self.nodes.iter().map(|entry| *entry.value()).sum();
        let live_blocks = self.nodes.len();
        RealmStats {
            outstanding_bytes: outstanding,
            live_blocks,
            used_chunks: live_blocks,
            footprint: TRACKING_HEADER_SIZE + outstanding + live_blocks * TRACKING_NODE_SIZE,
            ..RealmStats::new(TRACKING_IDENTITY)
        }
    }
}
