/*!
 * Threads Realm Tests
 * Per-thread isolation and the shared overflow pool under real threads
 */

use pretty_assertions::assert_eq;
use realm_alloc::core::ThreadsConfig;
use realm_alloc::memory::backends::{StandardBackend, ThreadsBackend};
use realm_alloc::memory::Runtime;
use std::collections::HashSet;
use std::sync::Barrier;

const THREADS: usize = 4;
const BLOCKS_PER_THREAD: usize = 200;

#[test]
fn test_thread_isolation() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = ThreadsBackend::create(&runtime, Some(root)).unwrap();
    let barrier = Barrier::new(THREADS);

    let per_thread: Vec<Vec<usize>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let runtime = &runtime;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let pattern = [t as u8 + 1; 48];
                    (0..BLOCKS_PER_THREAD)
                        .map(|_| {
                            let block = runtime.allocate(realm, 48).unwrap().unwrap();
                            runtime.memory().write(block, &pattern).unwrap();
                            block
                        })
                        .collect()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut seen = HashSet::new();
    for (t, blocks) in per_thread.iter().enumerate() {
        for &block in blocks {
            assert!(seen.insert(block), "block 0x{:x} handed out twice", block);
            assert_eq!(runtime.memory().read(block, 48).unwrap(), vec![t as u8 + 1; 48]);
        }
    }
    assert_eq!(
        runtime.stats(realm).unwrap().live_blocks,
        THREADS * BLOCKS_PER_THREAD
    );

    for block in per_thread.into_iter().flatten() {
        runtime.release(realm, block).unwrap();
    }
    assert_eq!(runtime.stats(realm).unwrap().outstanding_bytes, 0);
}

#[test]
fn test_departed_threads_feed_the_shared_pool() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = ThreadsBackend::create(&runtime, Some(root)).unwrap();

    // A short-lived worker grows a few chunks and leaves
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let me = std::thread::current().id();
            runtime.thread_register(realm, me).unwrap();
            for _ in 0..3 {
                runtime.allocate(realm, 0x1800).unwrap().unwrap();
            }
            runtime.thread_unregister(realm, me).unwrap();
        });
    });
    let parked = runtime.stats(realm).unwrap().free_chunks;
    assert!(parked >= 3, "expected parked chunks, found {}", parked);
    let parent_blocks = runtime.stats(root).unwrap().live_blocks;

    // A newcomer is served from what the worker left behind
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..2 {
                runtime.allocate(realm, 0x1800).unwrap().unwrap();
            }
        });
    });
    assert_eq!(runtime.stats(root).unwrap().live_blocks, parent_blocks);
}

#[test]
fn test_slot_overflow_goes_to_shared_pool() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let config = ThreadsConfig::default().with_thread_max_free(0);
    let realm = ThreadsBackend::create_with(&runtime, Some(root), config).unwrap();

    let first = runtime.allocate(realm, 0x3000).unwrap().unwrap();
    runtime.allocate(realm, 0x3000).unwrap().unwrap();
    runtime.release(realm, first).unwrap();

    // Nothing may stay on the thread's own free list, so the emptied
    // chunk now sits in the shared pool and the parent still holds it
    let stats = runtime.stats(realm).unwrap();
    assert_eq!(stats.free_chunks, 1);
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 4);
}

#[test]
fn test_many_threads_then_reset() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = ThreadsBackend::create(&runtime, Some(root)).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for size in [16, 300, 4000, 9000] {
                    runtime.allocate(realm, size).unwrap().unwrap();
                }
            });
        }
    });
    assert_eq!(runtime.stats(realm).unwrap().live_blocks, 32);

    runtime.reset(realm).unwrap();
    let stats = runtime.stats(realm).unwrap();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.outstanding_bytes, 0);

    runtime.destroy(realm).unwrap();
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 0);
}
