/*!
 * Trivial Realm Tests
 * Bump-and-free behaviour seen through the framework
 */

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realm_alloc::core::TrivialConfig;
use realm_alloc::memory::backends::{StandardBackend, TrackingBackend, TrivialBackend};
use realm_alloc::memory::Runtime;
use std::sync::Barrier;

#[test]
fn test_hundred_small_blocks_then_reset() {
    let runtime = Runtime::default();
    let config = TrivialConfig::default().with_min_alloc(8192);
    let realm = TrivialBackend::create_with(&runtime, None, config).expect("Failed to create realm");

    let blocks: Vec<_> = (0..100)
        .map(|i| {
            runtime
                .allocate(realm, 64)
                .unwrap_or_else(|e| panic!("allocation {} failed: {}", i, e))
                .expect("trivial realms never decline")
        })
        .collect();
    // 99 blocks fit beside the header; the hundredth needed a new chunk
    assert_eq!(runtime.stats(realm).unwrap().used_chunks, 2);

    for &block in &blocks[..99] {
        runtime.release(realm, block).unwrap();
    }
    let stats = runtime.stats(realm).unwrap();
    assert_eq!(stats.outstanding_bytes, 64);
    assert_eq!(stats.live_blocks, 1);

    runtime.reset(realm).unwrap();
    let stats = runtime.stats(realm).unwrap();
    assert_eq!(stats.used_chunks, 1, "only the self chunk stays in use");
    assert_eq!(stats.outstanding_bytes, 0);
    assert_eq!(stats.free_chunks, 1);
}

#[test]
fn test_reset_is_idempotent() {
    let runtime = Runtime::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    for size in [10, 5000, 20000, 7] {
        runtime.allocate(realm, size).unwrap().unwrap();
    }

    runtime.reset(realm).unwrap();
    let once = runtime.stats(realm).unwrap();
    runtime.reset(realm).unwrap();
    let twice = runtime.stats(realm).unwrap();
    assert_eq!(once.outstanding_bytes, twice.outstanding_bytes);
    assert_eq!(once, twice);
}

#[test]
fn test_zero_retention_returns_chunks_on_reset() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let config = TrivialConfig::no_retention();
    let realm = TrivialBackend::create_with(&runtime, Some(root), config).unwrap();

    for _ in 0..8 {
        runtime.allocate(realm, 0x1800).unwrap().unwrap();
    }
    let before = runtime.stats(root).unwrap().live_blocks;
    assert!(before > 1);

    runtime.reset(realm).unwrap();
    let after = runtime.stats(root).unwrap().live_blocks;
    assert!(after <= before);
    // Only the realm's own home block is left with the parent
    assert_eq!(after, 1);
    assert_eq!(runtime.stats(realm).unwrap().free_chunks, 0);
}

#[test]
fn test_zero_retention_returns_chunks_on_release() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = TrivialBackend::create_with(&runtime, Some(root), TrivialConfig::no_retention()).unwrap();

    let first = runtime.allocate(realm, 0x3000).unwrap().unwrap();
    let _second = runtime.allocate(realm, 0x3000).unwrap().unwrap();
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 3);

    // `first` is no longer the used tail, so its emptied chunk goes back
    runtime.release(realm, first).unwrap();
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 2);
}

#[test]
fn test_retention_keeps_chunks_for_reuse() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = TrivialBackend::create(&runtime, Some(root)).unwrap();

    let first = runtime.allocate(realm, 0x3000).unwrap().unwrap();
    runtime.allocate(realm, 0x3000).unwrap().unwrap();
    runtime.release(realm, first).unwrap();
    assert_eq!(runtime.stats(realm).unwrap().free_chunks, 1);

    // The parked chunk serves the next fitting request without the parent
    let parent_blocks = runtime.stats(root).unwrap().live_blocks;
    let again = runtime.allocate(realm, 0x3000).unwrap().unwrap();
    assert_eq!(again, first);
    assert_eq!(runtime.stats(root).unwrap().live_blocks, parent_blocks);
}

#[test]
fn test_trivial_under_tracking_parent() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let tracking = TrackingBackend::create(&runtime, Some(root)).unwrap();
    let realm = TrivialBackend::create(&runtime, Some(tracking)).unwrap();
    for _ in 0..4 {
        runtime.allocate(realm, 0x2000).unwrap().unwrap();
    }

    // Resetting the tracking parent reclaims the child wholesale
    runtime.reset(tracking).unwrap();
    assert!(!runtime.contains(realm));
    assert_eq!(runtime.stats(tracking).unwrap().live_blocks, 0);
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 1);
}

#[test]
fn test_resize_preserves_contents_across_chunks() {
    let runtime = Runtime::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    let block = runtime.allocate(realm, 16).unwrap().unwrap();
    runtime.memory().write(block, b"realm allocator!").unwrap();

    let grown = runtime.resize(realm, Some(block), 0x4000).unwrap().unwrap();
    assert_eq!(runtime.memory().read(grown, 16).unwrap(), b"realm allocator!".to_vec());

    let shrunk = runtime.resize(realm, Some(grown), 5).unwrap().unwrap();
    assert_eq!(runtime.memory().read(shrunk, 5).unwrap(), b"realm".to_vec());
    assert_eq!(runtime.stats(realm).unwrap().live_blocks, 1);
}

#[test]
fn test_shared_between_threads() {
    const THREADS: usize = 4;
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = TrivialBackend::create(&runtime, Some(root)).unwrap();
    let registered = Barrier::new(THREADS + 1);
    let finished = Barrier::new(THREADS + 1);

    let kept: Vec<(usize, usize, u8)> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let (runtime, registered, finished) = (&runtime, &registered, &finished);
                scope.spawn(move || {
                    let me = std::thread::current().id();
                    runtime.thread_register(realm, me).unwrap();
                    registered.wait();

                    let pattern = 0x10 + t as u8;
                    let mut rng = StdRng::seed_from_u64(t as u64);
                    let mut live = Vec::new();
                    for _ in 0..300 {
                        let size = if rng.gen_ratio(1, 20) {
                            rng.gen_range(0x1000..0x4000)
                        } else {
                            rng.gen_range(1..=256)
                        };
                        let block = runtime.allocate(realm, size).unwrap().unwrap();
                        runtime.memory().fill(block, size, pattern).unwrap();
                        live.push((block, size, pattern));

                        if rng.gen_bool(0.5) {
                            let (block, size, pattern) = live.swap_remove(rng.gen_range(0..live.len()));
                            assert_eq!(runtime.memory().read(block, size).unwrap(), vec![pattern; size]);
                            runtime.release(realm, block).unwrap();
                        }
                    }

                    finished.wait();
                    runtime.thread_unregister(realm, me).unwrap();
                    live
                })
            })
            .collect();

        registered.wait();
        assert_eq!(runtime.thread_count(realm).unwrap(), THREADS);
        finished.wait();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });
    assert_eq!(runtime.thread_count(realm).unwrap(), 0);

    // Survivors are disjoint and untouched by the other threads
    let mut sorted = kept.clone();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
    for &(block, size, pattern) in &kept {
        assert_eq!(runtime.memory().read(block, size).unwrap(), vec![pattern; size]);
        runtime.release(realm, block).unwrap();
    }

    let stats = runtime.stats(realm).unwrap();
    assert_eq!(stats.outstanding_bytes, 0);
    assert_eq!(stats.live_blocks, 0);
}
