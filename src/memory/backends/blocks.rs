/*!
 * Blocks Realm
 *
 * Single size-class allocator. Every block has the same size, so freed
 * blocks form a LIFO list threaded through their own first word and the
 * head is always a fit. Single-threaded by contract: no lock hooks.
 */

use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::{
    checked_align_default, BLOCKS_HEADER_SIZE, BLOCKS_INITIAL_CHUNK, BLOCKS_MIN_BLOCK,
};
use crate::core::types::{Address, Operation, RealmId, Size};
use crate::memory::realm::Runtime;
use crate::memory::traits::{Backend, RealmCtx};
use crate::memory::types::{RealmMemory, RealmStats};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub const BLOCKS_IDENTITY: &str = "BLOCKS";

#[derive(Debug, Clone, Copy)]
struct Extent {
    base: Address,
    size: Size,
}

impl Extent {
    fn end(&self) -> Address {
        self.base + self.size
    }
}

#[derive(Debug)]
struct BlocksState {
    cursor: Address,
    end: Address,
    /// Head of the intrusive free list
    free_head: Option<Address>,
    /// Chunks obtained from the parent after the home block
    growth: Vec<Extent>,
    /// Growth chunks kept after a reset the parent could not take back
    spares: Vec<Extent>,
    next_growth: Size,
    live_blocks: usize,
}

pub struct BlocksBackend {
    block_size: Size,
    home: Extent,
    state: Mutex<BlocksState>,
}

impl BlocksBackend {
    /// Create a blocks realm handing out `block_size` bytes per allocation
    pub fn create(runtime: &Runtime, parent: Option<RealmId>, block_size: Size) -> RealmResult<RealmId> {
        if block_size == 0 {
            return Err(RealmError::invalid("block size must be non-zero"));
        }
        let block_size = checked_align_default(block_size)
            .ok_or_else(|| RealmError::invalid(format!("block size {block_size} is too large")))?
            .max(BLOCKS_MIN_BLOCK);
        let home = runtime.upstream_zeroed_allocate(parent, BLOCKS_INITIAL_CHUNK)?;

        let backend = Arc::new(Self {
            block_size,
            home: Extent {
                base: home,
                size: BLOCKS_INITIAL_CHUNK,
            },
            state: Mutex::new(BlocksState {
                cursor: home + BLOCKS_HEADER_SIZE,
                end: home + BLOCKS_INITIAL_CHUNK,
                free_head: None,
                growth: Vec::new(),
                spares: Vec::new(),
                next_growth: BLOCKS_INITIAL_CHUNK.max(block_size),
                live_blocks: 0,
            }),
        });

        let memory = RealmMemory::new(home, BLOCKS_HEADER_SIZE);
        let realm = runtime.create_homed_realm(parent, memory, backend)?;
        runtime.validate(realm)?;
        debug!(%realm, block_size, "blocks realm created");
        Ok(realm)
    }

    pub fn block_size(&self) -> Size {
        self.block_size
    }

    /// Whether `address` starts a block this realm has carved
    fn is_carved(&self, state: &BlocksState, address: Address) -> bool {
        let home = Extent {
            base: self.home.base + BLOCKS_HEADER_SIZE,
            size: self.home.size - BLOCKS_HEADER_SIZE,
        };
        std::iter::once(home)
            .chain(state.growth.iter().copied())
            .any(|extent| {
                // Slots past the bump cursor were never handed out
                let carved_end = if (extent.base..=extent.end()).contains(&state.cursor) {
                    state.cursor
                } else {
                    extent.end()
                };
                address >= extent.base
                    && (address - extent.base) % self.block_size == 0
                    && address
                        .checked_add(self.block_size)
                        .is_some_and(|block_end| block_end <= carved_end)
            })
    }

    /// Pop the free list or bump the current chunk
    fn take(&self, ctx: &RealmCtx<'_>, state: &mut BlocksState) -> RealmResult<Option<Address>> {
        if let Some(head) = state.free_head {
            let next = ctx.memory().read_u64(head)? as Address;
            state.free_head = (next != 0).then_some(next);
            state.live_blocks += 1;
            return Ok(Some(head));
        }
        let fits = state
            .cursor
            .checked_add(self.block_size)
            .is_some_and(|block_end| block_end <= state.end);
        if fits {
            let address = state.cursor;
            state.cursor += self.block_size;
            state.live_blocks += 1;
            return Ok(Some(address));
        }
        Ok(None)
    }

    fn grow(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let spare = self.state.lock().spares.pop();
        let extent = match spare {
            Some(extent) => extent,
            None => {
                let size = self.state.lock().next_growth;
                let base = ctx.parent_allocate(size)?;
                self.state.lock().next_growth = size.saturating_mul(2);
                debug!(realm = %ctx.realm(), size, "blocks realm grew");
                Extent { base, size }
            }
        };

        let mut state = self.state.lock();
        state.cursor = extent.base;
        state.end = extent.end();
        state.growth.push(extent);
        Ok(())
    }
}

impl Backend for BlocksBackend {
    fn identity(&self) -> &'static str {
        BLOCKS_IDENTITY
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::Allocate
                | Operation::ZeroedAllocate
                | Operation::Release
                | Operation::Reset
                | Operation::Destroy
        )
    }

    /// Requests above the block size are declined
    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        if size > self.block_size {
            return Ok(None);
        }
        if let Some(address) = self.take(ctx, &mut self.state.lock())? {
            return Ok(Some(address));
        }
        self.grow(ctx)?;
        self.take(ctx, &mut self.state.lock())
    }

    fn zeroed_allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        let address = self.allocate(ctx, size)?;
        if let Some(address) = address {
            ctx.memory().fill(address, self.block_size, 0)?;
        }
        Ok(address)
    }

    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        let mut state = self.state.lock();
        if !self.is_carved(&state, address) {
            return Err(RealmError::invalid(format!(
                "0x{:x} is not a block of this realm",
                address
            )));
        }
        let next = state.free_head.unwrap_or(0);
        ctx.memory().write_u64(address, next as u64)?;
        state.free_head = Some(address);
        state.live_blocks = state.live_blocks.saturating_sub(1);
        Ok(())
    }

    fn reset(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let can_release = ctx.parent_can_release();
        let returned = {
            let mut state = self.state.lock();
            state.cursor = self.home.base + BLOCKS_HEADER_SIZE;
            state.end = self.home.end();
            state.free_head = None;
            state.live_blocks = 0;
            let growth = std::mem::take(&mut state.growth);
            if can_release {
                state.next_growth = BLOCKS_INITIAL_CHUNK.max(self.block_size);
                growth
            } else {
                state.spares.extend(growth);
                Vec::new()
            }
        };
        for extent in returned {
            ctx.parent_release(extent.base)?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        if !ctx.parent_can_release() {
            return Ok(());
        }
        let extents: Vec<Extent> = {
            let mut state = self.state.lock();
            let mut extents = std::mem::take(&mut state.growth);
            extents.append(&mut state.spares);
            extents
        };
        for extent in extents {
            ctx.parent_release(extent.base)?;
        }
        ctx.parent_release(self.home.base)
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        let state = self.state.lock();
        let footprint = self.home.size
            + state.growth.iter().map(|extent| extent.size).sum::<Size>()
            + state.spares.iter().map(|extent| extent.size).sum::<Size>();
        RealmStats {
            outstanding_bytes: state.live_blocks * self.block_size,
            live_blocks: state.live_blocks,
            used_chunks: 1 + state.growth.len(),
            free_chunks: state.spares.len(),
            footprint,
            ..RealmStats::new(BLOCKS_IDENTITY)
        }
    }
}
