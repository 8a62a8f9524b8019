/*!
 * Realm Framework Tests
 * Tree structure, dispatch rules and error reporting
 */

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use realm_alloc::core::RuntimeConfig;
use realm_alloc::memory::backends::{
    BlocksBackend, StandardBackend, TrackingBackend, TrivialBackend, BLOCKS_IDENTITY,
    TRACKING_IDENTITY, TRIVIAL_IDENTITY,
};
use realm_alloc::memory::Runtime;
use realm_alloc::{
    Address, Backend, Operation, RealmCtx, RealmError, RealmId, RealmMemory, RealmResult, Size,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_ancestor_query() {
    let runtime = Runtime::default();
    let a = TrivialBackend::create(&runtime, None).expect("Failed to create root");
    let b = TrivialBackend::create(&runtime, Some(a)).expect("Failed to create child");

    assert!(runtime.is_ancestor(a, b).unwrap());
    assert!(!runtime.is_ancestor(b, a).unwrap());
    assert!(runtime.is_ancestor(a, a).unwrap());
}

#[test]
fn test_children_are_listed_newest_first() {
    let runtime = Runtime::default();
    let root = TrivialBackend::create(&runtime, None).unwrap();
    let first = TrivialBackend::create(&runtime, Some(root)).unwrap();
    let second = BlocksBackend::create(&runtime, Some(root), 32).unwrap();
    let third = TrackingBackend::create(&runtime, Some(root)).unwrap();

    assert_eq!(runtime.children(root).unwrap(), vec![third, second, first]);

    runtime.destroy(second).unwrap();
    assert_eq!(runtime.children(root).unwrap(), vec![third, first]);
    assert_eq!(runtime.parent(first).unwrap(), Some(root));
}

#[test]
fn test_zero_size_allocate_is_null() {
    let runtime = Runtime::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    assert_eq!(runtime.allocate(realm, 0).unwrap(), None);
    assert_eq!(runtime.zeroed_allocate(realm, 0).unwrap(), None);
    assert_eq!(runtime.stats(realm).unwrap().live_blocks, 0);
}

#[test]
fn test_resize_edge_cases() {
    let runtime = Runtime::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();

    // No block behaves as allocate
    let block = runtime.resize(realm, None, 40).unwrap();
    assert!(block.is_some());
    assert_eq!(runtime.stats(realm).unwrap().live_blocks, 1);

    // Zero size behaves as release
    assert_eq!(runtime.resize(realm, block, 0).unwrap(), None);
    assert_eq!(runtime.stats(realm).unwrap().live_blocks, 0);
}

#[test]
fn test_stale_realm_is_invalid() {
    let runtime = Runtime::default();
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    runtime.destroy(realm).unwrap();

    assert!(matches!(
        runtime.allocate(realm, 8),
        Err(RealmError::InvalidRealm(id)) if id == realm
    ));
    assert!(matches!(runtime.destroy(realm), Err(RealmError::InvalidRealm(_))));
}

#[test]
fn test_reset_detaches_children() {
    let runtime = Runtime::default();
    let root = TrivialBackend::create(&runtime, None).unwrap();
    let child = TrivialBackend::create(&runtime, Some(root)).unwrap();
    let grandchild = BlocksBackend::create(&runtime, Some(child), 64).unwrap();

    runtime.reset(root).unwrap();
    assert!(runtime.children(root).unwrap().is_empty());
    assert!(!runtime.contains(child));
    assert!(!runtime.contains(grandchild));
    assert_eq!(runtime.realm_count(), 1);
}

#[test]
fn test_reset_requires_tracking_realm() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    assert!(!runtime.is_tracking(root).unwrap());
    match runtime.reset(root) {
        Err(RealmError::MissingOperation { operation, identity }) => {
            assert_eq!(operation, Operation::Reset);
            assert_eq!(identity, "STANDARD");
        }
        other => panic!("expected MissingOperation, got {:?}", other),
    }
}

#[test]
fn test_lock_without_hook_is_noop() {
    let runtime = Runtime::default();
    let realm = BlocksBackend::create(&runtime, None, 16).unwrap();
    assert!(!runtime.supports(realm, Operation::Lock).unwrap());
    runtime.lock(realm).unwrap();
    runtime.unlock(realm).unwrap();
}

#[test]
fn test_identities() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let trivial = TrivialBackend::create(&runtime, Some(root)).unwrap();
    let blocks = BlocksBackend::create(&runtime, Some(trivial), 8).unwrap();
    let tracking = TrackingBackend::create(&runtime, Some(root)).unwrap();

    assert_eq!(runtime.identity(trivial).unwrap(), TRIVIAL_IDENTITY);
    assert_eq!(runtime.identity(blocks).unwrap(), BLOCKS_IDENTITY);
    assert_eq!(runtime.identity(tracking).unwrap(), TRACKING_IDENTITY);
}

#[test]
fn test_thread_register_walks_ancestors() {
    let runtime = Runtime::default();
    let root = TrivialBackend::create(&runtime, None).unwrap();
    let child = TrivialBackend::create(&runtime, Some(root)).unwrap();
    let me = std::thread::current().id();

    runtime.thread_register(child, me).unwrap();
    assert_eq!(runtime.thread_count(child).unwrap(), 1);
    assert_eq!(runtime.thread_count(root).unwrap(), 1);

    runtime.thread_unregister(child, me).unwrap();
    assert_eq!(runtime.thread_count(root).unwrap(), 0);
}

static ABORTS: AtomicUsize = AtomicUsize::new(0);

fn count_abort(_error: &RealmError) {
    ABORTS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_abort_hook_fires_on_exhaustion() {
    let runtime = Runtime::new(RuntimeConfig::with_heap_limit(0x4000));
    let realm = TrivialBackend::create(&runtime, None).unwrap();
    runtime.set_abort(realm, Some(count_abort)).unwrap();

    let err = runtime.allocate(realm, 0x8000).unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(ABORTS.load(Ordering::SeqCst), 1);

    // Requests that succeed leave the hook alone
    runtime.allocate(realm, 64).unwrap().unwrap();
    assert_eq!(ABORTS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_accounting_must_be_self_or_child() {
    let runtime = Runtime::default();
    let root = TrivialBackend::create(&runtime, None).unwrap();
    let child = TrackingBackend::create(&runtime, Some(root)).unwrap();
    let stranger = TrivialBackend::create(&runtime, None).unwrap();

    runtime.set_accounting(root, child).unwrap();
    assert_eq!(runtime.accounting(root).unwrap(), child);
    assert!(runtime.set_accounting(root, stranger).is_err());
}

#[test]
fn test_error_serializes_with_tag() {
    let err = RealmError::InvalidArgument("bad".to_string());
    let json = serde_json::to_string(&err).unwrap();
    assert_eq!(json, r#"{"error_type":"invalid_argument","details":"bad"}"#);
}

/// Non-tracking realm that passes every request through to its parent and
/// keeps its header in a block carved from the parent
struct PassThrough;

const PASS_THROUGH_HEADER: Size = 64;

impl PassThrough {
    fn create(runtime: &Runtime, parent: RealmId) -> RealmResult<RealmId> {
        let home = runtime
            .zeroed_allocate(parent, PASS_THROUGH_HEADER)?
            .ok_or_else(|| RealmError::InvalidArgument("parent declined the header".into()))?;
        runtime.create_realm(
            Some(parent),
            Some(RealmMemory::new(home, PASS_THROUGH_HEADER)),
            Arc::new(PassThrough),
        )
    }
}

impl Backend for PassThrough {
    fn identity(&self) -> &'static str {
        "PASS_THROUGH"
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::Allocate | Operation::Release)
    }

    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        ctx.parent_allocate(size).map(Some)
    }

    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        ctx.parent_release(address)
    }
}

/// Tracking realm without individual release: blocks only go back to the
/// parent on reset or destroy
#[derive(Default)]
struct Arena {
    blocks: Mutex<Vec<Address>>,
}

impl Arena {
    fn live(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl Backend for Arena {
    fn identity(&self) -> &'static str {
        "ARENA"
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::Allocate | Operation::Reset | Operation::Destroy
        )
    }

    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        let block = ctx.parent_allocate(size)?;
        self.blocks.lock().push(block);
        Ok(Some(block))
    }

    fn reset(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        let blocks = std::mem::take(&mut *self.blocks.lock());
        for block in blocks {
            ctx.parent_release(block)?;
        }
        Ok(())
    }

    fn destroy(&self, ctx: &RealmCtx<'_>) -> RealmResult<()> {
        self.reset(ctx)
    }
}

#[test]
fn test_destroy_hands_header_back_to_releasing_parent() {
    let runtime = Runtime::default();
    let parent = TrivialBackend::create(&runtime, None).unwrap();
    let child = PassThrough::create(&runtime, parent).unwrap();
    assert!(!runtime.is_tracking(child).unwrap());
    assert_eq!(runtime.stats(parent).unwrap().live_blocks, 1);

    let block = runtime.allocate(child, 100).unwrap().unwrap();
    assert_eq!(runtime.stats(parent).unwrap().live_blocks, 2);
    runtime.release(child, block).unwrap();

    runtime.destroy(child).unwrap();
    assert!(!runtime.contains(child));
    let stats = runtime.stats(parent).unwrap();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.outstanding_bytes, 0);
}

#[test]
fn test_destroy_leaves_header_to_tracking_parent() {
    let runtime = Runtime::default();
    let root = StandardBackend::create(&runtime).unwrap();
    let arena = Arc::new(Arena::default());
    let tracker = runtime
        .create_realm(Some(root), None, Arc::clone(&arena) as Arc<dyn Backend>)
        .unwrap();
    assert!(runtime.is_tracking(tracker).unwrap());
    assert!(!runtime.supports(tracker, Operation::Release).unwrap());

    let child = PassThrough::create(&runtime, tracker).unwrap();
    runtime.allocate(child, 48).unwrap().unwrap();
    assert_eq!(arena.live(), 2);

    // Nothing is released: the header and the block wait for the tracker
    runtime.destroy(child).unwrap();
    assert!(!runtime.contains(child));
    assert_eq!(arena.live(), 2);
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 2);

    runtime.reset(tracker).unwrap();
    assert_eq!(arena.live(), 0);
    assert_eq!(runtime.stats(root).unwrap().live_blocks, 0);
    runtime.destroy(tracker).unwrap();
}
