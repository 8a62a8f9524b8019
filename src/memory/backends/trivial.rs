/*!
 * Trivial Realm
 *
 * General-purpose bump-and-free allocator. Requests are bumped off the most
 * recently used chunk; emptied chunks go to a free list scanned first-fit,
 * or back to the parent once the retention budget is spent.
 */

use crate::core::config::TrivialConfig;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::TRIVIAL_HEADER_SIZE;
use crate::core::types::{Address, Operation, RealmId, Size};
use crate::memory::chunk::{
    block_footprint, chunk_request, seal_block, BlockHeader, Chunk, ChunkKey, ChunkPool, Vacated,
};
use crate::memory::realm::Runtime;
use crate::memory::traits::{Backend, RealmCtx};
use crate::memory::types::{RealmMemory, RealmStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, trace};

pub const TRIVIAL_IDENTITY: &str = "TRIVIAL";

pub struct TrivialBackend {
    min_alloc: Size,
    min_free: Size,
    home: Address,
    /// Coarse realm-wide lock; never contended until a second thread registers
    pool: Mutex<ChunkPool>,
}

impl TrivialBackend {
    /// Create a trivial realm with the default thresholds
    pub fn create(runtime: &Runtime, parent: Option<RealmId>) -> RealmResult<RealmId> {
        Self::create_with(runtime, parent, TrivialConfig::default())
    }

    /// Create a trivial realm; the header and the self chunk share one
    /// `min_alloc` block obtained from the parent
    pub fn create_with(
        runtime: &Runtime,
        parent: Option<RealmId>,
        config: TrivialConfig,
    ) -> RealmResult<RealmId> {
        let config = config.normalized()?;
        let home = runtime.upstream_zeroed_allocate(parent, config.min_alloc)?;
        let self_chunk = Chunk::new(home + TRIVIAL_HEADER_SIZE, config.min_alloc - TRIVIAL_HEADER_SIZE);

        let backend = Arc::new(Self {
            min_alloc: config.min_alloc,
            min_free: config.min_free,
            home,
            pool: Mutex::new(ChunkPool::new(self_chunk, config.max_free)),
        });

        let memory = RealmMemory::new(home, TRIVIAL_HEADER_SIZE);
        let realm = runtime.create_homed_realm(parent, memory, backend)?;
        runtime.validate(realm)?;
        debug!(%realm, min_alloc = config.min_alloc, max_free = config.max_free, "trivial realm created");
        Ok(realm)
    }

    fn owner_key(header: &BlockHeader) -> RealmResult<ChunkKey> {
        ChunkKey::try_from(header.owner)
            .map_err(|_| RealmError::invalid(format!("corrupt block header owner {:#x}", header.owner)))
    }
}

impl Backend for TrivialBackend {
    fn identity(&self) -> &'static str {
        TRIVIAL_IDENTITY
    }

    fn supports(&self, operation: Operation) -> bool {
        !matches!(
            operation,
            Operation::ZeroedAllocate | Operation::Lock | Operation::Unlock
        )
    }

    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        let exhausted = || RealmError::out_of_memory(size, ctx.realm().to_string());
        let need = block_footprint(size).ok_or_else(exhausted)?;
        {
            let mut pool = self.pool.lock();
            if let Some((key, raw)) = pool.bump(need).or_else(|| pool.take_free(need)) {
                pool.note_allocated(size);
                drop(pool);
                return seal_block(ctx.memory(), raw, key as u64, size).map(Some);
            }
        }

        // Grow from the parent without holding our own lock
        let chunk_size = chunk_request(need, self.min_free, self.min_alloc).ok_or_else(exhausted)?;
        match ctx.parent_allocate(chunk_size) {
            Ok(base) => {
                let (key, raw) = {
                    let mut pool = self.pool.lock();
                    let carved = pool.adopt(Chunk::new(base, chunk_size), need);
                    pool.note_allocated(size);
                    carved
                };
                debug!(realm = %ctx.realm(), chunk_size, "trivial realm grew");
                seal_block(ctx.memory(), raw, key as u64, size).map(Some)
            }
            Err(e) => {
                self.pool.lock().exhaust_tail();
                Err(e)
            }
        }
    }

    /// Move to a new block; the old block survives a failed allocation
    fn resize(&self, ctx: &RealmCtx<'_>, address: Address, size: Size) -> RealmResult<Option<Address>> {
        let header = BlockHeader::read(ctx.memory(), address)?;
        let Some(moved) = self.allocate(ctx, size)? else {
            return Ok(None);
        };
        ctx.memory().copy(address, moved, header.size.min(size))?;
        self.release(ctx, address)?;
        Ok(Some(moved))
    }

    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        let header = BlockHeader::read(ctx.memory(), address)?;
        let key = Self::owner_key(&header)?;
        let can_release = ctx.parent_can_release();

        let mut pool = self.pool.lock();
        if pool.vacate(key, address, header.size)? != Vacated::Detached {
            return Ok(());
        }
        let avail = pool.arena.chunk(key).avail_size;
        if can_release && key != pool.self_key && avail > pool.max_free {
            if let Some(chunk) = pool.surrender(key) {
                drop(pool);
                trace!(realm = %ctx.realm(), base = chunk.base, "chunk returned to parent");
                return ctx.parent_release(chunk.base);
            }
            return Ok(());
        }
        pool.park(key);
        Ok(())
    }

    fn reset(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let can_release = ctx.parent_can_release();
        let released = self.pool.lock().reset(can_release, self.min_alloc);
        let count = released.len();
        for chunk in released {
            ctx.parent_release(chunk.base)?;
        }
        debug!(realm = %ctx.realm(), returned = count, "trivial realm reset");
        Ok(())
    }

    fn pre_destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let pool = self.pool.lock();
        if pool.live_blocks > 0 {
            trace!(
                realm = %ctx.realm(),
                live_blocks = pool.live_blocks,
                "trivial realm destroyed with live blocks"
            );
        }
        Ok(())
    }

    fn destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        // A parent that cannot release individually reclaims on its own reset
        if !ctx.parent_can_release() {
            return Ok(());
        }
        let chunks = self.pool.lock().drain();
        for chunk in chunks {
            ctx.parent_release(chunk.base)?;
        }
        ctx.parent_release(self.home)
    }

    fn thread_register(&self, ctx: &RealmCtx<'_>, thread: ThreadId) -> RealmResult<()> {
        if ctx.thread_count() == 2 {
            debug!(realm = %ctx.realm(), ?thread, "trivial realm now shared between threads");
        }
        Ok(())
    }

    fn thread_unregister(&self, _ctx: &RealmCtx<'_>, _thread: ThreadId) -> RealmResult<()> {
        Ok(())
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        let pool = self.pool.lock();
        RealmStats {
            outstanding_bytes: pool.outstanding,
            live_blocks: pool.live_blocks,
            used_chunks: pool.used_chunks(),
            free_chunks: pool.free_chunks(),
            retained_bytes: pool.retained_bytes(),
            footprint: pool.footprint + self.min_alloc,
            ..RealmStats::new(TRIVIAL_IDENTITY)
        }
    }
}
