/*!
 * Memory Traits
 * The backend contract every realm implementation plugs into
 */

use super::address_space::AddressSpace;
use super::realm::Runtime;
use super::types::RealmStats;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::types::{Address, Operation, RealmId, Size};
use std::thread::ThreadId;

/// Realm backend interface
///
/// Every operation is optional. The default bodies report
/// `MissingOperation`, and `supports` must answer `false` for them so the
/// framework never calls an absent operation.
pub trait Backend: Send + Sync {
    /// Identity tag of the backend
    fn identity(&self) -> &'static str;

    /// Whether the backend provides `operation`
    fn supports(&self, operation: Operation) -> bool;

    /// Allocate `size` (> 0) bytes; `Ok(None)` declines the request
    fn allocate(&self, _ctx: &RealmCtx<'_>, _size: Size) -> RealmResult<Option<Address>> {
        Err(RealmError::missing(Operation::Allocate, self.identity()))
    }

    fn zeroed_allocate(&self, _ctx: &RealmCtx<'_>, _size: Size) -> RealmResult<Option<Address>> {
        Err(RealmError::missing(Operation::ZeroedAllocate, self.identity()))
    }

    /// Move a live block to one of `size` (> 0) bytes
    fn resize(
        &self,
        _ctx: &RealmCtx<'_>,
        _address: Address,
        _size: Size,
    ) -> RealmResult<Option<Address>> {
        Err(RealmError::missing(Operation::Resize, self.identity()))
    }

    fn release(&self, _ctx: &RealmCtx<'_>, _address: Address) -> RealmResult<()> {
        Err(RealmError::missing(Operation::Release, self.identity()))
    }

    /// Reclaim every allocation at once (the mark of a tracking realm)
    fn reset(&self, _ctx: &RealmCtx<'_>) -> RealmResult<()> {
        Err(RealmError::missing(Operation::Reset, self.identity()))
    }

    /// Called on every realm that goes away, even when its memory is
    /// reclaimed implicitly by an ancestor
    fn pre_destroy(&self, _ctx: &RealmCtx<'_>) -> RealmResult<()> {
        Err(RealmError::missing(Operation::PreDestroy, self.identity()))
    }

    fn destroy(&self, _ctx: &RealmCtx<'_>) -> RealmResult<()> {
        Err(RealmError::missing(Operation::Destroy, self.identity()))
    }

    fn lock(&self, _ctx: &RealmCtx<'_>) -> RealmResult<()> {
        Err(RealmError::missing(Operation::Lock, self.identity()))
    }

    fn unlock(&self, _ctx: &RealmCtx<'_>) -> RealmResult<()> {
        Err(RealmError::missing(Operation::Unlock, self.identity()))
    }

    fn thread_register(&self, _ctx: &RealmCtx<'_>, _thread: ThreadId) -> RealmResult<()> {
        Err(RealmError::missing(Operation::ThreadRegister, self.identity()))
    }

    fn thread_unregister(&self, _ctx: &RealmCtx<'_>, _thread: ThreadId) -> RealmResult<()> {
        Err(RealmError::missing(Operation::ThreadUnregister, self.identity()))
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        RealmStats::new(self.identity())
    }
}

/// Call context handed to a backend
///
/// Carries the runtime, the realm being operated on and its parent, so a
/// backend can reach the parent's allocation path without holding any
/// framework lock.
#[derive(Clone, Copy)]
pub struct RealmCtx<'a> {
    runtime: &'a Runtime,
    realm: RealmId,
    parent: Option<RealmId>,
}

impl<'a> RealmCtx<'a> {
    pub(crate) fn new(runtime: &'a Runtime, realm: RealmId, parent: Option<RealmId>) -> Self {
        Self {
            runtime,
            realm,
            parent,
        }
    }

    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    pub fn realm(&self) -> RealmId {
        self.realm
    }

    pub fn parent(&self) -> Option<RealmId> {
        self.parent
    }

    pub fn memory(&self) -> &'a AddressSpace {
        self.runtime.memory()
    }

    /// Obtain `size` bytes from the parent, or the process heap at the root
    pub fn parent_allocate(&self, size: Size) -> RealmResult<Address> {
        self.runtime.upstream_allocate(self.parent, size)
    }

    pub fn parent_zeroed_allocate(&self, size: Size) -> RealmResult<Address> {
        self.runtime.upstream_zeroed_allocate(self.parent, size)
    }

    pub fn parent_release(&self, address: Address) -> RealmResult<()> {
        self.runtime.upstream_release(self.parent, address)
    }

    /// Whether memory can be handed back upstream individually
    pub fn parent_can_release(&self) -> bool {
        self.runtime.upstream_can_release(self.parent)
    }

    /// Thread-count hint of the realm
    pub fn thread_count(&self) -> usize {
        self.runtime.thread_count(self.realm).unwrap_or(0)
    }
}

impl std::fmt::Debug for RealmCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmCtx")
            .field("realm", &self.realm)
            .field("parent", &self.parent)
            .finish()
    }
}
