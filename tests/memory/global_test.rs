/*!
 * Global Runtime Tests
 */

use pretty_assertions::assert_eq;
use realm_alloc::memory::backends::{BlocksBackend, ThreadsBackend, TrivialBackend};
use realm_alloc::memory::global;
use realm_alloc::RealmError;
use serial_test::serial;
use std::sync::Arc;

#[test]
#[serial]
fn test_global_requires_initialize() {
    assert!(!global::is_initialized());
    assert!(matches!(global::global(), Err(RealmError::InvalidArgument(_))));
}

#[test]
#[serial]
fn test_backends_under_global_root() {
    let handle = global::initialize().expect("Failed to initialize global runtime");
    let runtime = Arc::clone(handle.runtime());
    let root = handle.root();

    let threads = ThreadsBackend::create(&runtime, Some(root)).unwrap();
    let trivial = TrivialBackend::create(&runtime, Some(threads)).unwrap();
    let blocks = BlocksBackend::create(&runtime, Some(root), 96).unwrap();
    for realm in [threads, trivial, blocks] {
        assert!(runtime.allocate(realm, 80).unwrap().is_some());
    }
    assert_eq!(global::global().unwrap().root(), root);

    global::terminate().unwrap();
    assert!(!global::is_initialized());
    assert_eq!(runtime.realm_count(), 0);
    assert_eq!(runtime.memory().stats().live_regions, 0);
}

#[test]
#[serial]
fn test_reinitialize_after_terminate() {
    let first = global::initialize().unwrap();
    global::terminate().unwrap();

    let second = global::initialize().unwrap();
    assert!(!Arc::ptr_eq(first.runtime(), second.runtime()));
    assert_eq!(second.runtime().realm_count(), 1);
    global::terminate().unwrap();
}
