/*!
 * Cleanup Tests
 * Registration, matching and ordering of realm cleanups
 */

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use realm_alloc::memory::backends::{StandardBackend, ThreadsBackend, TrivialBackend};
use realm_alloc::memory::{CleanupData, Runtime};
use realm_alloc::{RealmError, RealmResult};
use std::sync::Arc;

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Cleanup payload appending its name to a shared log
struct Marker {
    name: &'static str,
    log: Log,
}

fn marker(name: &'static str, log: &Log) -> CleanupData {
    Arc::new(Marker {
        name,
        log: Arc::clone(log),
    })
}

fn record(data: &CleanupData) -> RealmResult<()> {
    let marker = data
        .downcast_ref::<Marker>()
        .ok_or_else(|| RealmError::InvalidArgument("not a marker".to_string()))?;
    marker.log.lock().push(marker.name);
    Ok(())
}

fn other(_data: &CleanupData) -> RealmResult<()> {
    Ok(())
}

fn failing(_data: &CleanupData) -> RealmResult<()> {
    Err(RealmError::InvalidArgument("cleanup refused".to_string()))
}

#[test]
fn test_destroy_cascades_deepest_first() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let root = TrivialBackend::create(&runtime, None).unwrap();
    let mid = TrivialBackend::create(&runtime, Some(root)).unwrap();
    let leaf = TrivialBackend::create(&runtime, Some(mid)).unwrap();
    runtime.allocate(leaf, 256).unwrap().unwrap();

    runtime.register_cleanup(root, 1, marker("root", &log), record).unwrap();
    runtime.register_cleanup(mid, 1, marker("mid", &log), record).unwrap();
    runtime.register_cleanup(leaf, 1, marker("leaf", &log), record).unwrap();

    runtime.destroy(root).unwrap();
    assert_eq!(*log.lock(), vec!["leaf", "mid", "root"]);
    assert_eq!(runtime.realm_count(), 0);
}

#[test]
fn test_cleanups_run_newest_first() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    for name in ["first", "second", "third"] {
        runtime.register_cleanup(realm, 7, marker(name, &log), record).unwrap();
    }

    runtime.reset(realm).unwrap();
    assert_eq!(*log.lock(), vec!["third", "second", "first"]);
    assert_eq!(runtime.cleanup_count(realm).unwrap(), 0);

    // Reset again: nothing left to run
    runtime.reset(realm).unwrap();
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn test_unregister_matches_data_and_callback() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    let data = marker("kept", &log);
    runtime.register_cleanup(realm, 3, Arc::clone(&data), record).unwrap();

    assert_eq!(
        runtime.unregister_cleanup(realm, 3, &data, other),
        Err(RealmError::CleanupNotFound)
    );
    assert_eq!(
        runtime.unregister_cleanup(realm, 3, &marker("kept", &log), record),
        Err(RealmError::CleanupNotFound)
    );
    assert_eq!(
        runtime.unregister_cleanup(realm, 4, &data, record),
        Err(RealmError::CleanupNotFound)
    );

    // Type 0 matches any type
    runtime.unregister_cleanup(realm, 0, &data, record).unwrap();
    assert_eq!(runtime.cleanup_count(realm).unwrap(), 0);
    runtime.destroy(realm).unwrap();
    assert!(log.lock().is_empty());
}

#[test]
fn test_run_cleanup_fires_once() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    let data = marker("once", &log);
    runtime.register_cleanup(realm, 2, Arc::clone(&data), record).unwrap();

    runtime.run_cleanup(realm, 2, &data, record).unwrap();
    runtime.destroy(realm).unwrap();
    assert_eq!(*log.lock(), vec!["once"]);
}

#[test]
fn test_run_by_type_leaves_other_types() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    runtime.register_cleanup(realm, 1, marker("a", &log), record).unwrap();
    runtime.register_cleanup(realm, 2, marker("b", &log), record).unwrap();
    runtime.register_cleanup(realm, 1, marker("c", &log), record).unwrap();

    runtime.run_cleanup_by_type(realm, 1).unwrap();
    assert_eq!(*log.lock(), vec!["c", "a"]);
    assert_eq!(runtime.cleanup_count(realm).unwrap(), 1);

    runtime.unregister_cleanup_by_type(realm, 2).unwrap();
    assert_eq!(
        runtime.unregister_cleanup_by_type(realm, 2),
        Err(RealmError::CleanupNotFound)
    );
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_failing_cleanup_does_not_stop_destroy() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    runtime.register_cleanup(realm, 1, marker("after", &log), record).unwrap();
    runtime.register_cleanup(realm, 1, marker("boom", &log), failing).unwrap();

    runtime.destroy(realm).unwrap();
    assert_eq!(*log.lock(), vec!["after"]);
}

#[test]
fn test_records_are_charged_to_accounting_realm() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let data = marker("charged", &log);

    runtime.register_cleanup(root, 1, Arc::clone(&data), record).unwrap();
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 1);
    runtime.unregister_cleanup(root, 1, &data, record).unwrap();
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 0);
}

#[test]
fn test_non_tracking_root_runs_children_then_own_cleanups() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let child = TrivialBackend::create(&runtime, Some(root)).unwrap();
    runtime.register_cleanup(root, 1, marker("root", &log), record).unwrap();
    runtime.register_cleanup(child, 1, marker("child", &log), record).unwrap();

    runtime.destroy(root).unwrap();
    assert_eq!(*log.lock(), vec!["child", "root"]);
    assert_eq!(runtime.memory().stats().live_regions, 0);
}

#[test]
fn test_threads_cleanups_live_in_accounting_mirror() {
    let runtime = Runtime::default();
    let log: Log = Arc::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let realm = ThreadsBackend::create(&runtime, Some(root)).unwrap();
    let accounting = runtime.accounting(realm).unwrap();

    runtime.register_cleanup(realm, 1, marker("threads", &log), record).unwrap();
    assert_eq!(runtime.stats(accounting).unwrap().live_blocks, 1);

    runtime.reset(realm).unwrap();
    assert_eq!(*log.lock(), vec!["threads"]);
    runtime.destroy(realm).unwrap();
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 0);
}
