/*!
 * Shared Pool
 * Cross-thread overflow pool of a threads realm
 *
 * Holds the chunks departing threads leave behind and serves the realm's
 * accounting mirror. Every access goes through the pool mutex; a thread
 * never holds it while locking its own slot.
 */

use super::slot::{owner_word, SHARED_SERIAL};
use crate::core::config::ThreadsConfig;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::types::{Address, RealmId, Size};
use crate::memory::chunk::{block_footprint, chunk_request, seal_block, Chunk, ChunkKey, ChunkPool, Vacated};
use crate::memory::realm::Runtime;
use parking_lot::Mutex;
use tracing::trace;

pub(super) struct SharedPool {
    pub pool: Mutex<ChunkPool>,
    min_alloc: Size,
    min_free: Size,
}

impl SharedPool {
    pub fn new(self_chunk: Chunk, config: &ThreadsConfig) -> Self {
        Self {
            pool: Mutex::new(ChunkPool::new(self_chunk, config.max_free)),
            min_alloc: config.min_alloc,
            min_free: config.min_free,
        }
    }

    /// Carve a block owned by the shared pool, growing from `upstream`
    pub fn allocate(&self, runtime: &Runtime, upstream: Option<RealmId>, size: Size) -> RealmResult<Address> {
        let exhausted = || RealmError::out_of_memory(size, "threads shared pool");
        let need = block_footprint(size).ok_or_else(exhausted)?;
        {
            let mut pool = self.pool.lock();
            if let Some((key, raw)) = pool.bump(need).or_else(|| pool.take_free(need)) {
                pool.note_allocated(size);
                drop(pool);
                return seal_block(runtime.memory(), raw, owner_word(SHARED_SERIAL, key), size);
            }
        }

        let chunk_size = chunk_request(need, self.min_free, self.min_alloc).ok_or_else(exhausted)?;
        let base = match runtime.upstream_allocate(upstream, chunk_size) {
            Ok(base) => base,
            Err(e) => {
                self.pool.lock().exhaust_tail();
                return Err(e);
            }
        };
        let (key, raw) = {
            let mut pool = self.pool.lock();
            let carved = pool.adopt(Chunk::new(base, chunk_size), need);
            pool.note_allocated(size);
            carved
        };
        seal_block(runtime.memory(), raw, owner_word(SHARED_SERIAL, key), size)
    }

    pub fn release(
        &self,
        runtime: &Runtime,
        upstream: Option<RealmId>,
        address: Address,
        key: ChunkKey,
        size: Size,
    ) -> RealmResult<()> {
        let can_release = runtime.upstream_can_release(upstream);
        let mut pool = self.pool.lock();
        if pool.vacate(key, address, size)? != Vacated::Detached {
            return Ok(());
        }
        let avail = pool.arena.chunk(key).avail_size;
        if can_release && key != pool.self_key && avail > pool.max_free {
            if let Some(chunk) = pool.surrender(key) {
                drop(pool);
                trace!(base = chunk.base, "shared chunk returned upstream");
                return runtime.upstream_release(upstream, chunk.base);
            }
            return Ok(());
        }
        pool.park(key);
        Ok(())
    }

    /// Take over the chunks of a departing thread; returns those to hand upstream
    pub fn fold(&self, chunks: Vec<Chunk>, can_release: bool) -> Vec<Chunk> {
        let mut pool = self.pool.lock();
        chunks
            .into_iter()
            .filter_map(|chunk| pool.absorb(chunk, can_release))
            .collect()
    }
}
