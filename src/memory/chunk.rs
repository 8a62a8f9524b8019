/*!
 * Chunk Primitives
 * Chunks, block headers and the bump-and-free chunk pool
 *
 * A chunk is a span of memory obtained from a parent realm. Allocations are
 * bumped off its cursor, each preceded by a `BlockHeader` naming the chunk,
 * so release finds the owner in O(1). Chunks live in a slab and are threaded
 * onto two circular lists (used and free) through two sentinel slots.
 */

use super::address_space::AddressSpace;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::{checked_align_default, BLOCK_HEADER_SIZE, CHUNK_HEADER_SIZE};
use crate::core::types::{Address, Size};

/// Slab index of a chunk
pub(crate) type ChunkKey = u32;

/// Sentinel of the used list
pub(crate) const USED: ChunkKey = 0;
/// Sentinel of the free list
pub(crate) const FREE: ChunkKey = 1;

/// Bytes a request occupies in a chunk: rounded payload plus its header.
/// `None` when the request cannot be represented at all.
#[inline]
pub(crate) fn block_footprint(size: Size) -> Option<Size> {
    checked_align_default(size)?.checked_add(BLOCK_HEADER_SIZE)
}

/// Size of the chunk to ask the parent for when `need` bytes do not fit
#[inline]
pub(crate) fn chunk_request(need: Size, min_free: Size, min_alloc: Size) -> Option<Size> {
    need.checked_add(min_free).map(|size| size.max(min_alloc))
}

/// Payload bytes charged to the books for a live block
#[inline]
fn charged(size: Size) -> Size {
    checked_align_default(size).unwrap_or(size)
}

/// Memory extent subdivided into allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub base: Address,
    pub size: Size,
    pub first_avail: Address,
    pub avail_size: Size,
    pub count: u32,
}

impl Chunk {
    /// A rewound chunk spanning `[base, base + size)`
    pub fn new(base: Address, size: Size) -> Self {
        Self {
            base,
            size,
            first_avail: base + CHUNK_HEADER_SIZE,
            avail_size: size.saturating_sub(CHUNK_HEADER_SIZE),
            count: 0,
        }
    }

    #[inline]
    pub fn start(&self) -> Address {
        self.base + CHUNK_HEADER_SIZE
    }

    /// Fold the consumed prefix back into the available space
    #[inline]
    pub fn rewind(&mut self) {
        self.avail_size += self.first_avail - self.start();
        self.first_avail = self.start();
    }

    /// Mark the remaining space consumed
    #[inline]
    pub fn exhaust(&mut self) {
        self.first_avail += self.avail_size;
        self.avail_size = 0;
    }

    #[inline]
    pub fn carve(&mut self, need: Size) -> Address {
        debug_assert!(self.avail_size >= need);
        let address = self.first_avail;
        self.first_avail += need;
        self.avail_size -= need;
        self.count += 1;
        address
    }

    /// Whether `address` lies in the chunk's carving area
    #[inline]
    pub fn holds(&self, address: Address) -> bool {
        address >= self.start() && address < self.base + self.size
    }
}

/// Header written immediately before every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    /// Owner word: chunk key, optionally tagged with a slot serial
    pub owner: u64,
    /// Size the caller asked for
    pub size: Size,
}

impl BlockHeader {
    pub fn write(&self, space: &AddressSpace, at: Address) -> RealmResult<()> {
        let mut raw = [0u8; BLOCK_HEADER_SIZE];
        raw[..8].copy_from_slice(&self.owner.to_le_bytes());
        raw[8..].copy_from_slice(&(self.size as u64).to_le_bytes());
        space.write(at, &raw)
    }

    /// Decode the header preceding `payload`
    pub fn read(space: &AddressSpace, payload: Address) -> RealmResult<Self> {
        let at = payload.checked_sub(BLOCK_HEADER_SIZE).ok_or_else(|| {
            RealmError::invalid(format!("0x{:x} cannot be a block payload", payload))
        })?;
        let owner = space.read_u64(at)?;
        let size = space.read_u64(at + 8)? as Size;
        Ok(Self { owner, size })
    }
}

/// Write the header for a freshly carved block and return the payload address
pub(crate) fn seal_block(
    space: &AddressSpace,
    raw: Address,
    owner: u64,
    size: Size,
) -> RealmResult<Address> {
    BlockHeader { owner, size }.write(space, raw)?;
    Ok(raw + BLOCK_HEADER_SIZE)
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    chunk: Chunk,
    prev: ChunkKey,
    next: ChunkKey,
    occupied: bool,
}

impl Slot {
    fn sentinel(key: ChunkKey) -> Self {
        Self {
            chunk: Chunk::new(0, 0),
            prev: key,
            next: key,
            occupied: true,
        }
    }
}

/// Slab of chunks with used and free sentinel lists
#[derive(Debug, Clone)]
pub(crate) struct ChunkArena {
    slots: Vec<Slot>,
    vacant: Vec<ChunkKey>,
}

impl ChunkArena {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::sentinel(USED), Slot::sentinel(FREE)],
            vacant: Vec::new(),
        }
    }

    /// Add a detached chunk
    pub fn insert(&mut self, chunk: Chunk) -> ChunkKey {
        match self.vacant.pop() {
            Some(key) => {
                self.slots[key as usize] = Slot {
                    chunk,
                    prev: key,
                    next: key,
                    occupied: true,
                };
                key
            }
            None => {
                let key = self.slots.len() as ChunkKey;
                self.slots.push(Slot {
                    chunk,
                    prev: key,
                    next: key,
                    occupied: true,
                });
                key
            }
        }
    }

    /// Unlink and drop a chunk, returning it
    pub fn remove(&mut self, key: ChunkKey) -> Option<Chunk> {
        if !self.is_chunk(key) {
            return None;
        }
        self.unlink(key);
        let slot = &mut self.slots[key as usize];
        slot.occupied = false;
        self.vacant.push(key);
        Some(slot.chunk)
    }

    pub fn is_chunk(&self, key: ChunkKey) -> bool {
        key > FREE
            && self
                .slots
                .get(key as usize)
                .is_some_and(|slot| slot.occupied)
    }

    pub fn get(&self, key: ChunkKey) -> Option<&Chunk> {
        if self.is_chunk(key) {
            Some(&self.slots[key as usize].chunk)
        } else {
            None
        }
    }

    /// Chunk behind a key taken from one of the lists
    #[inline]
    pub fn chunk(&self, key: ChunkKey) -> &Chunk {
        &self.slots[key as usize].chunk
    }

    #[inline]
    pub fn chunk_mut(&mut self, key: ChunkKey) -> &mut Chunk {
        &mut self.slots[key as usize].chunk
    }

    pub fn unlink(&mut self, key: ChunkKey) {
        let Slot { prev, next, .. } = self.slots[key as usize];
        self.slots[prev as usize].next = next;
        self.slots[next as usize].prev = prev;
        let slot = &mut self.slots[key as usize];
        slot.prev = key;
        slot.next = key;
    }

    pub fn link_tail(&mut self, list: ChunkKey, key: ChunkKey) {
        let last = self.slots[list as usize].prev;
        self.slots[key as usize].prev = last;
        self.slots[key as usize].next = list;
        self.slots[last as usize].next = key;
        self.slots[list as usize].prev = key;
    }

    pub fn link_head(&mut self, list: ChunkKey, key: ChunkKey) {
        let first = self.slots[list as usize].next;
        self.slots[key as usize].next = first;
        self.slots[key as usize].prev = list;
        self.slots[first as usize].prev = key;
        self.slots[list as usize].next = key;
    }

    pub fn tail(&self, list: ChunkKey) -> Option<ChunkKey> {
        let key = self.slots[list as usize].prev;
        (key != list).then_some(key)
    }

    pub fn head(&self, list: ChunkKey) -> Option<ChunkKey> {
        let key = self.slots[list as usize].next;
        (key != list).then_some(key)
    }

    /// Predecessor of `key`, `None` at the sentinel
    pub fn prev(&self, key: ChunkKey) -> Option<ChunkKey> {
        let prev = self.slots[key as usize].prev;
        (prev > FREE).then_some(prev)
    }

    /// Keys of a list in order
    pub fn keys(&self, list: ChunkKey) -> Vec<ChunkKey> {
        let mut keys = Vec::new();
        let mut key = self.slots[list as usize].next;
        while key != list {
            keys.push(key);
            key = self.slots[key as usize].next;
        }
        keys
    }

    pub fn len(&self, list: ChunkKey) -> usize {
        self.keys(list).len()
    }

    /// First free chunk with at least `need` bytes available
    ///
    /// The free sentinel's size is set to `need` so the scan always stops.
    pub fn find_fit(&mut self, need: Size) -> Option<ChunkKey> {
        self.slots[FREE as usize].chunk.avail_size = need;
        let mut key = self.slots[FREE as usize].next;
        while self.slots[key as usize].chunk.avail_size < need {
            key = self.slots[key as usize].next;
        }
        (key != FREE).then_some(key)
    }

    /// Bytes available across a list
    pub fn avail_bytes(&self, list: ChunkKey) -> Size {
        self.keys(list)
            .into_iter()
            .map(|key| self.chunk(key).avail_size)
            .sum()
    }
}

impl Default for ChunkArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of dropping a block's use count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Vacated {
    /// Other blocks still live in the chunk
    Busy,
    /// The chunk is empty but stays in place as the used tail
    Tail,
    /// The chunk is empty and detached; the caller decides where it goes
    Detached,
}

/// Bump-and-free chunk pool
///
/// `max_free` is a budget that counts down as chunks are parked on the free
/// list; the self chunk is never charged against it and never leaves.
#[derive(Debug, Clone)]
pub(crate) struct ChunkPool {
    pub arena: ChunkArena,
    pub self_key: ChunkKey,
    pub max_free: Size,
    pub outstanding: Size,
    pub live_blocks: usize,
    /// Bytes of chunks obtained from upstream, the self chunk excluded
    pub footprint: Size,
}

impl ChunkPool {
    pub fn new(self_chunk: Chunk, max_free: Size) -> Self {
        let mut arena = ChunkArena::new();
        let self_key = arena.insert(self_chunk);
        arena.link_tail(USED, self_key);
        Self {
            arena,
            self_key,
            max_free,
            outstanding: 0,
            live_blocks: 0,
            footprint: 0,
        }
    }

    /// Carve from the used tail if it has room
    pub fn bump(&mut self, need: Size) -> Option<(ChunkKey, Address)> {
        let key = self.arena.tail(USED)?;
        let chunk = self.arena.chunk_mut(key);
        if chunk.avail_size >= need {
            Some((key, chunk.carve(need)))
        } else {
            None
        }
    }

    /// Leave a busy used tail fully consumed after a failed growth
    ///
    /// Its space comes back when the last block in it is released.
    pub fn exhaust_tail(&mut self) {
        if let Some(key) = self.arena.tail(USED) {
            let chunk = self.arena.chunk_mut(key);
            if chunk.count > 0 {
                chunk.exhaust();
            }
        }
    }

    /// Move the first fitting free chunk to the used tail and carve from it
    pub fn take_free(&mut self, need: Size) -> Option<(ChunkKey, Address)> {
        let key = self.arena.find_fit(need)?;
        Some((key, self.promote(key, need)))
    }

    /// Move a free chunk to the used tail and carve `need` bytes
    pub fn promote(&mut self, key: ChunkKey, need: Size) -> Address {
        self.arena.unlink(key);
        self.arena.link_tail(USED, key);
        if key != self.self_key {
            self.max_free += self.arena.chunk(key).avail_size;
        }
        self.arena.chunk_mut(key).carve(need)
    }

    /// Take in a chunk from upstream as the new used tail and carve from it
    pub fn adopt(&mut self, chunk: Chunk, need: Size) -> (ChunkKey, Address) {
        self.footprint += chunk.size;
        let key = self.arena.insert(chunk);
        self.arena.link_tail(USED, key);
        (key, self.arena.chunk_mut(key).carve(need))
    }

    /// Take in a chunk moved over from another pool onto the free list
    pub fn receive_free(&mut self, chunk: Chunk) -> ChunkKey {
        self.footprint += chunk.size;
        let key = self.arena.insert(chunk);
        self.park(key);
        key
    }

    /// Detach a chunk for handing to another pool or upstream
    pub fn surrender(&mut self, key: ChunkKey) -> Option<Chunk> {
        let chunk = self.arena.remove(key)?;
        self.footprint = self.footprint.saturating_sub(chunk.size);
        Some(chunk)
    }

    /// Detach the first free chunk, other than the self chunk, with `need`
    /// bytes available
    pub fn withdraw(&mut self, need: Size) -> Option<Chunk> {
        let key = self.arena.keys(FREE).into_iter().find(|&key| {
            key != self.self_key && self.arena.chunk(key).avail_size >= need
        })?;
        self.max_free += self.arena.chunk(key).avail_size;
        self.surrender(key)
    }

    /// Take over a chunk from an owner that is going away
    ///
    /// The chunk is parked rewound while the budget allows; otherwise it is
    /// handed back for release upstream.
    pub fn absorb(&mut self, chunk: Chunk, can_release: bool) -> Option<Chunk> {
        let chunk = Chunk::new(chunk.base, chunk.size);
        if can_release && chunk.avail_size > self.max_free {
            return Some(chunk);
        }
        self.receive_free(chunk);
        None
    }

    pub fn note_allocated(&mut self, size: Size) {
        self.outstanding += charged(size);
        self.live_blocks += 1;
    }

    /// Drop the use count of the chunk holding `payload`
    pub fn vacate(&mut self, key: ChunkKey, payload: Address, size: Size) -> RealmResult<Vacated> {
        let live = self
            .arena
            .get(key)
            .is_some_and(|chunk| chunk.count > 0 && chunk.holds(payload - BLOCK_HEADER_SIZE));
        if !live {
            return Err(RealmError::invalid(format!(
                "0x{:x} is not a live block of this realm",
                payload
            )));
        }

        self.outstanding = self.outstanding.saturating_sub(charged(size));
        self.live_blocks = self.live_blocks.saturating_sub(1);

        let chunk = self.arena.chunk_mut(key);
        chunk.count -= 1;
        if chunk.count > 0 {
            return Ok(Vacated::Busy);
        }
        chunk.rewind();
        if self.arena.tail(USED) == Some(key) {
            return Ok(Vacated::Tail);
        }
        self.arena.unlink(key);
        Ok(Vacated::Detached)
    }

    /// Park a detached chunk on the free list, charging the budget
    pub fn park(&mut self, key: ChunkKey) {
        self.arena.link_tail(FREE, key);
        if key != self.self_key {
            self.max_free = self.max_free.saturating_sub(self.arena.chunk(key).avail_size);
        }
    }

    /// Empty the pool back to its self chunk
    ///
    /// With `can_release`, used chunks are kept (newest first) while the
    /// remaining budget stays above `min_alloc`; the rest is returned.
    /// Without it everything lands on the free list.
    pub fn reset(&mut self, can_release: bool, min_alloc: Size) -> Vec<Chunk> {
        self.arena.unlink(self.self_key);
        for key in self.arena.keys(USED) {
            let chunk = self.arena.chunk_mut(key);
            chunk.rewind();
            chunk.count = 0;
        }
        let own = self.arena.chunk_mut(self.self_key);
        own.rewind();
        own.count = 0;

        let mut released = Vec::new();
        if can_release {
            let mut budget = self.max_free;
            let mut cursor = self.arena.tail(USED);
            while budget > min_alloc {
                let Some(key) = cursor else { break };
                cursor = self.arena.prev(key);
                let avail = self.arena.chunk(key).avail_size;
                if avail <= budget {
                    budget -= avail;
                    self.arena.unlink(key);
                    self.arena.link_head(FREE, key);
                }
            }
            self.max_free = budget;

            for key in self.arena.keys(USED) {
                if let Some(chunk) = self.surrender(key) {
                    released.push(chunk);
                }
            }
        } else {
            for key in self.arena.keys(USED).into_iter().rev() {
                self.arena.unlink(key);
                self.arena.link_head(FREE, key);
            }
        }

        self.arena.link_tail(USED, self.self_key);
        self.outstanding = 0;
        self.live_blocks = 0;
        released
    }

    /// Detach every chunk except the self chunk
    pub fn drain(&mut self) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for list in [USED, FREE] {
            for key in self.arena.keys(list) {
                if key == self.self_key {
                    continue;
                }
                if let Some(chunk) = self.surrender(key) {
                    chunks.push(chunk);
                }
            }
        }
        chunks
    }

    pub fn used_chunks(&self) -> usize {
        self.arena.len(USED)
    }

    pub fn free_chunks(&self) -> usize {
        self.arena.len(FREE)
    }

    pub fn retained_bytes(&self) -> Size {
        self.arena.avail_bytes(FREE)
    }
}
