/*!
 * Threads Realm
 *
 * Bump-and-free allocation replicated per calling thread. Each thread owns a
 * slot with its own chunk lists; a mutex-protected shared pool collects the
 * chunks of threads that leave and feeds threads that run dry. A thread only
 * ever locks its own slot on the allocation path, so the common case never
 * contends.
 */

mod accounting;
mod shared;
mod slot;

pub use accounting::THREADS_ACCT_IDENTITY;

use crate::core::config::ThreadsConfig;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::{SLOT_HEADER_SIZE, THREADS_ACCT_HEADER_SIZE, THREADS_HEADER_SIZE};
use crate::core::types::{Address, Operation, RealmId, Size};
use crate::memory::chunk::{block_footprint, chunk_request, seal_block, BlockHeader, Chunk, Vacated};
use crate::memory::realm::Runtime;
use crate::memory::traits::{Backend, RealmCtx};
use crate::memory::types::{RealmMemory, RealmStats};
use accounting::ThreadsAccounting;
use shared::SharedPool;
use slot::{owner_word, split_owner, SlotTable, ThreadSlot, SHARED_SERIAL};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, trace};

pub const THREADS_IDENTITY: &str = "THREADS";

pub struct ThreadsBackend {
    config: ThreadsConfig,
    home: Address,
    shared: Arc<SharedPool>,
    slots: SlotTable,
    next_serial: AtomicU32,
}

impl ThreadsBackend {
    pub fn create(runtime: &Runtime, parent: Option<RealmId>) -> RealmResult<RealmId> {
        Self::create_with(runtime, parent, ThreadsConfig::default())
    }

    /// Create a threads realm
    ///
    /// One `min_alloc` block from the parent holds the realm header, the
    /// accounting mirror's header and the shared pool's self chunk.
    pub fn create_with(
        runtime: &Runtime,
        parent: Option<RealmId>,
        config: ThreadsConfig,
    ) -> RealmResult<RealmId> {
        let config = config.normalized()?;
        let home = runtime.upstream_zeroed_allocate(parent, config.min_alloc)?;
        let reserved = THREADS_HEADER_SIZE + THREADS_ACCT_HEADER_SIZE;
        let shared = Arc::new(SharedPool::new(
            Chunk::new(home + reserved, config.min_alloc - reserved),
            &config,
        ));

        let backend = Arc::new(Self {
            config,
            home,
            shared: Arc::clone(&shared),
            slots: SlotTable::new(),
            next_serial: AtomicU32::new(SHARED_SERIAL + 1),
        });

        let memory = RealmMemory::new(home, THREADS_HEADER_SIZE);
        let realm = runtime.create_homed_realm(parent, memory, backend)?;
        ThreadsAccounting::attach(runtime, realm, parent, shared, home + THREADS_HEADER_SIZE)?;
        runtime.validate(realm)?;
        debug!(%realm, min_alloc = config.min_alloc, max_free = config.max_free, "threads realm created");
        Ok(realm)
    }

    /// Slot of `thread`, registering it on first use
    ///
    /// A new slot lives in a chunk reclaimed from the shared pool when one
    /// is there, else in a fresh `min_alloc` block from the parent.
    fn slot_for(&self, ctx: &RealmCtx<'_>, thread: ThreadId) -> RealmResult<Arc<ThreadSlot>> {
        if let Some(slot) = self.slots.find(thread) {
            return Ok(slot);
        }

        let reused = self.shared.pool.lock().withdraw(SLOT_HEADER_SIZE);
        let (home, home_size) = match reused {
            Some(chunk) => (chunk.base, chunk.size),
            None => (ctx.parent_allocate(self.config.min_alloc)?, self.config.min_alloc),
        };
        ctx.memory().fill(home, SLOT_HEADER_SIZE, 0)?;

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ThreadSlot::new(
            thread,
            serial,
            home,
            home_size,
            self.config.thread_max_free,
        ));
        self.slots.insert(Arc::clone(&slot));
        debug!(realm = %ctx.realm(), ?thread, serial, reused = reused.is_some(), "thread slot created");

        if self.slots.len() == 2 {
            debug!(realm = %ctx.realm(), "threads realm now shared between threads");
        }
        Ok(slot)
    }

    /// Hand a departing slot's chunks to the shared pool; the overflow goes
    /// upstream
    fn retire(&self, ctx: &RealmCtx<'_>, slot: &ThreadSlot, can_release: bool) -> RealmResult<()> {
        let spilled = self.shared.fold(slot.dismantle(), can_release);
        trace!(realm = %ctx.realm(), serial = slot.serial, spilled = spilled.len(), "thread slot retired");
        for chunk in spilled {
            ctx.parent_release(chunk.base)?;
        }
        Ok(())
    }
}

impl Backend for ThreadsBackend {
    fn identity(&self) -> &'static str {
        THREADS_IDENTITY
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
        let slot = self.slot_for(ctx, std::thread::current().id())?;

        {
            let mut pool = slot.pool.lock();
            if let Some((key, raw)) = pool.bump(need).or_else(|| pool.take_free(need)) {
                pool.note_allocated(size);
                drop(pool);
                return seal_block(ctx.memory(), raw, owner_word(slot.serial, key), size).map(Some);
            }
        }

        let borrowed = self.shared.pool.lock().withdraw(need);
        let chunk = match borrowed {
            Some(chunk) => chunk,
            None => {
                let chunk_size = chunk_request(need, self.config.min_free, self.config.min_alloc)
                    .ok_or_else(exhausted)?;
                match ctx.parent_allocate(chunk_size) {
                    Ok(base) => Chunk::new(base, chunk_size),
                    Err(e) => {
                        slot.pool.lock().exhaust_tail();
                        return Err(e);
                    }
                }
            }
        };

        let (key, raw) = {
            let mut pool = slot.pool.lock();
            let carved = pool.adopt(chunk, need);
            pool.note_allocated(size);
            carved
        };
        trace!(realm = %ctx.realm(), serial = slot.serial, shared = borrowed.is_some(), "thread slot grew");
        seal_block(ctx.memory(), raw, owner_word(slot.serial, key), size).map(Some)
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

    /// Return a block to the slot that carved it, whichever thread calls
    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        let header = BlockHeader::read(ctx.memory(), address)?;
        let (serial, key) = split_owner(header.owner);
        if serial == SHARED_SERIAL {
            return self
                .shared
                .release(ctx.runtime(), ctx.parent(), address, key, header.size);
        }
        let slot = self.slots.by_serial(serial).ok_or_else(|| {
            RealmError::invalid(format!(
                "0x{:x} belongs to a thread slot that no longer exists",
                address
            ))
        })?;

        let chunk = {
            let mut pool = slot.pool.lock();
            if pool.vacate(key, address, header.size)? != Vacated::Detached {
                return Ok(());
            }
            let avail = pool.arena.chunk(key).avail_size;
            if key == pool.self_key || avail <= pool.max_free {
                pool.park(key);
                return Ok(());
            }
            pool.surrender(key)
        };

        let Some(chunk) = chunk else { return Ok(()) };
        let spilled = self.shared.fold(vec![chunk], ctx.parent_can_release());
        for chunk in spilled {
            ctx.parent_release(chunk.base)?;
        }
        Ok(())
    }

    /// Fold every slot into the shared pool, reset it and start over with
    /// a fresh accounting mirror and the calling thread registered
    fn reset(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let can_release = ctx.parent_can_release();
        let slots = self.slots.take_all();
        for slot in &slots {
            self.retire(ctx, slot, can_release)?;
        }

        let released = self.shared.pool.lock().reset(can_release, self.config.min_alloc);
        for chunk in &released {
            ctx.parent_release(chunk.base)?;
        }
        debug!(realm = %ctx.realm(), slots = slots.len(), returned = released.len(), "threads realm reset");

        ThreadsAccounting::attach(
            ctx.runtime(),
            ctx.realm(),
            ctx.parent(),
            Arc::clone(&self.shared),
            self.home + THREADS_HEADER_SIZE,
        )?;
        self.slot_for(ctx, std::thread::current().id())?;
        Ok(())
    }

    fn pre_destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        trace!(realm = %ctx.realm(), slots = self.slots.len(), "threads realm going away");
        Ok(())
    }

    fn destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        if !ctx.parent_can_release() {
            return Ok(());
        }
        let mut chunks: Vec<Chunk> = self
            .slots
            .take_all()
            .iter()
            .flat_map(|slot| slot.dismantle())
            .collect();
        chunks.extend(self.shared.pool.lock().drain());
        for chunk in chunks {
            ctx.parent_release(chunk.base)?;
        }
        ctx.parent_release(self.home)
    }

    fn thread_register(&self, ctx: &RealmCtx<'_>, thread: ThreadId) -> RealmResult<()> {
        self.slot_for(ctx, thread).map(|_| ())
    }

    fn thread_unregister(&self, ctx: &RealmCtx<'_>, thread: ThreadId) -> RealmResult<()> {
        let Some(slot) = self.slots.remove(thread) else {
            return Ok(());
        };
        self.retire(ctx, &slot, ctx.parent_can_release())
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        let mut stats = RealmStats::new(THREADS_IDENTITY);
        for slot in self.slots.slots() {
            let pool = slot.pool.lock();
            stats.outstanding_bytes += pool.outstanding;
            stats.live_blocks += pool.live_blocks;
            stats.used_chunks += pool.used_chunks();
            stats.free_chunks += pool.free_chunks();
            stats.retained_bytes += pool.retained_bytes();
            stats.footprint += pool.footprint + slot.home_size;
        }
        let shared = self.shared.pool.lock();
        stats.free_chunks += shared.free_chunks();
        stats.retained_bytes += shared.retained_bytes();
        stats.footprint += shared.footprint + self.config.min_alloc;
        stats
    }
}
