/*!
 * Thread Slots
 * Per-thread chunk pools and the table that finds them
 */

use crate::core::limits::{SLOT_HEADER_SIZE, THREAD_HASH_SIZE};
use crate::core::types::{Address, Size};
use crate::memory::chunk::{Chunk, ChunkKey, ChunkPool};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::ThreadId;

/// Serial of the shared pool in a block's owner word
pub(super) const SHARED_SERIAL: u32 = 0;

/// Pack a slot serial and chunk key into a block header owner word
#[inline]
pub(super) fn owner_word(serial: u32, key: ChunkKey) -> u64 {
    (u64::from(serial) << 32) | u64::from(key)
}

#[inline]
pub(super) fn split_owner(owner: u64) -> (u32, ChunkKey) {
    ((owner >> 32) as u32, owner as u32)
}

/// Allocation state of one thread
///
/// The slot header and the slot's self chunk share the `home` extent.
/// Only the owning thread carves from the pool; other threads lock it to
/// release blocks they were handed.
#[derive(Debug)]
pub(super) struct ThreadSlot {
    pub thread: ThreadId,
    pub serial: u32,
    pub home: Address,
    pub home_size: Size,
    pub pool: Mutex<ChunkPool>,
}

impl ThreadSlot {
    pub fn new(thread: ThreadId, serial: u32, home: Address, home_size: Size, max_free: Size) -> Self {
        let self_chunk = Chunk::new(home + SLOT_HEADER_SIZE, home_size - SLOT_HEADER_SIZE);
        Self {
            thread,
            serial,
            home,
            home_size,
            pool: Mutex::new(ChunkPool::new(self_chunk, max_free)),
        }
    }

    /// Every chunk the slot holds, its home extent last
    pub fn dismantle(&self) -> Vec<Chunk> {
        let mut chunks = self.pool.lock().drain();
        chunks.push(Chunk::new(self.home, self.home_size));
        chunks
    }
}

/// Chained hash table of thread slots plus a serial index for release
pub(super) struct SlotTable {
    hasher: RandomState,
    buckets: Box<[RwLock<Vec<Arc<ThreadSlot>>>]>,
    by_serial: DashMap<u32, Arc<ThreadSlot>, RandomState>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            hasher: RandomState::new(),
            buckets: (0..THREAD_HASH_SIZE).map(|_| RwLock::new(Vec::new())).collect(),
            by_serial: DashMap::with_hasher(RandomState::new()),
        }
    }

    #[inline]
    fn bucket(&self, thread: ThreadId) -> &RwLock<Vec<Arc<ThreadSlot>>> {
        let hash = self.hasher.hash_one(thread) as usize;
        &self.buckets[hash % THREAD_HASH_SIZE]
    }

    pub fn find(&self, thread: ThreadId) -> Option<Arc<ThreadSlot>> {
        self.bucket(thread)
            .read()
            .iter()
            .find(|slot| slot.thread == thread)
            .cloned()
    }

    pub fn by_serial(&self, serial: u32) -> Option<Arc<ThreadSlot>> {
        self.by_serial.get(&serial).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert at the front of its chain
    pub fn insert(&self, slot: Arc<ThreadSlot>) {
        self.by_serial.insert(slot.serial, Arc::clone(&slot));
        self.bucket(slot.thread).write().insert(0, slot);
    }

    pub fn remove(&self, thread: ThreadId) -> Option<Arc<ThreadSlot>> {
        let slot = {
            let mut chain = self.bucket(thread).write();
            let index = chain.iter().position(|slot| slot.thread == thread)?;
            chain.remove(index)
        };
        self.by_serial.remove(&slot.serial);
        Some(slot)
    }

    /// Remove every slot
    pub fn take_all(&self) -> Vec<Arc<ThreadSlot>> {
        let mut slots = Vec::new();
        for bucket in self.buckets.iter() {
            slots.append(&mut bucket.write());
        }
        self.by_serial.clear();
        slots
    }

    /// Snapshot of the live slots
    pub fn slots(&self) -> Vec<Arc<ThreadSlot>> {
        self.by_serial
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_serial.len()
    }
}
