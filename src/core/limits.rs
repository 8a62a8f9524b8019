/*!
 * System Limits and Constants
 *
 * Centralized location for allocator thresholds, header sizes and magic numbers.
 * Organized by backend for maintainability and discoverability.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Layout constants mirror 64-bit header sizes and are marked with [LAYOUT]
 */

use super::types::Size;

// =============================================================================
// ALIGNMENT AND LAYOUT
// =============================================================================

/// Default allocation alignment (8 bytes)
pub const ALIGN_DEFAULT: Size = 8;

/// Alignment of regions handed out by the simulated process heap
pub const REGION_ALIGN: Size = 16;

/// First address handed out by the simulated process heap (above the zero page)
pub const ADDRESS_SPACE_BASE: usize = 0x1000;

/// Gap left between heap regions so overruns never land in a neighbour
pub const REGION_GUARD: Size = 16;

/// [LAYOUT] Header preceding every chunk-carved payload: chunk key + logical size
pub const BLOCK_HEADER_SIZE: Size = 16;

/// [LAYOUT] Chunk header: links, cursor, remaining size and use count
pub const CHUNK_HEADER_SIZE: Size = 40;

/// [LAYOUT] Per-thread slot header carved from the front of a slot's home block
pub const SLOT_HEADER_SIZE: Size = 120;

/// [LAYOUT] Memory charged to the accounting realm for each cleanup record
pub const CLEANUP_RECORD_SIZE: Size = 32;

/// [LAYOUT] Realm header sizes, one per backend
pub const STANDARD_HEADER_SIZE: Size = 128;
pub const TRIVIAL_HEADER_SIZE: Size = 208;
pub const BLOCKS_HEADER_SIZE: Size = 168;
pub const THREADS_HEADER_SIZE: Size = 256;
pub const THREADS_ACCT_HEADER_SIZE: Size = 136;
pub const TRACKING_HEADER_SIZE: Size = 144;

/// [LAYOUT] Tracking node prepended to each tracked allocation
pub const TRACKING_NODE_SIZE: Size = 16;

// =============================================================================
// BUMP-AND-FREE (TRIVIAL) THRESHOLDS
// =============================================================================

/// Floor of how many bytes a trivial realm asks its parent for (8KB)
pub const TRIVIAL_MIN_ALLOC: Size = 0x2000;

/// Extra bytes added on top of a request when growing (4KB)
/// [PERF] Leaves room for follow-up bump allocations in the new chunk
pub const TRIVIAL_MIN_FREE: Size = 0x1000;

/// Bytes a trivial realm may retain on its free list before returning chunks (512KB)
pub const TRIVIAL_MAX_FREE: Size = 0x80000;

// =============================================================================
// PER-THREAD (THREADS) THRESHOLDS
// =============================================================================

/// Floor of how many bytes a threads realm asks its parent for (8KB)
pub const THREADS_MIN_ALLOC: Size = 0x2000;

/// Extra bytes added on top of a request when growing (4KB)
pub const THREADS_MIN_FREE: Size = 0x1000;

/// Bytes the shared cross-thread pool may retain (1MB)
pub const THREADS_MAX_FREE: Size = 0x100000;

/// Bytes each thread may retain on its own free list (512KB)
pub const THREAD_MAX_FREE: Size = 0x80000;

/// Buckets in the thread slot hash table
/// [PERF] Prime just below a power of two for even spreading
pub const THREAD_HASH_SIZE: usize = 1021;

// =============================================================================
// FIXED-BLOCK (BLOCKS) THRESHOLDS
// =============================================================================

/// Size of a blocks realm's home block and of its first growth chunk (8KB)
pub const BLOCKS_INITIAL_CHUNK: Size = 8 * 1024;

/// Smallest block size; a freed block must hold the free-list link
pub const BLOCKS_MIN_BLOCK: Size = 8;

/// Round `size` up to the default alignment boundary
#[inline]
pub const fn align_default(size: Size) -> Size {
    (size + ALIGN_DEFAULT - 1) & !(ALIGN_DEFAULT - 1)
}

/// Round `size` up to an arbitrary power-of-two boundary
#[inline]
pub const fn align_to(size: Size, align: Size) -> Size {
    (size + align - 1) & !(align - 1)
}

/// `align_default` for caller-supplied sizes; `None` when rounding overflows
#[inline]
pub const fn checked_align_default(size: Size) -> Option<Size> {
    checked_align_to(size, ALIGN_DEFAULT)
}

/// `align_to` for caller-supplied sizes; `None` when rounding overflows
#[inline]
pub const fn checked_align_to(size: Size, align: Size) -> Option<Size> {
    match size.checked_add(align - 1) {
        Some(padded) => Some(padded & !(align - 1)),
        None => None,
    }
}
