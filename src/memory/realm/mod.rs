/*!
 * Realm Framework
 *
 * The runtime owns the simulated process heap and the realm tree. Every
 * operation looks the realm up, clones its backend handle and calls it with
 * no framework lock held, so backends are free to call back into the
 * runtime for their parent's memory.
 */

mod cleanup;
mod lifecycle;
mod table;

pub use cleanup::{CleanupData, CleanupFn};
pub use table::AbortFn;

use super::address_space::AddressSpace;
use super::traits::{Backend, RealmCtx};
use super::types::{RealmMemory, RealmStats};
use crate::core::config::RuntimeConfig;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::types::{Address, Operation, RealmId, Size};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::ThreadId;
use table::{RealmNode, RealmTable};
use tracing::{debug, info, trace, warn};

/// Realm runtime: process heap plus realm tree
pub struct Runtime {
    space: AddressSpace,
    table: RwLock<RealmTable>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        info!(heap_limit = ?config.heap_limit, "realm runtime created");
        Self {
            space: AddressSpace::new(config.heap_limit),
            table: RwLock::new(RealmTable::new()),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The simulated process heap
    pub fn memory(&self) -> &AddressSpace {
        &self.space
    }

    /// Number of live realms
    pub fn realm_count(&self) -> usize {
        self.table.read().len()
    }

    pub fn contains(&self, realm: RealmId) -> bool {
        self.table.read().contains(realm)
    }

    /// Register a realm backed by `backend` under `parent`
    ///
    /// The first `header_size` bytes of `home` are zero-filled. The new realm
    /// is its own accounting realm and is pushed in front of the parent's
    /// children.
    pub fn create_realm(
        &self,
        parent: Option<RealmId>,
        home: Option<RealmMemory>,
        backend: Arc<dyn Backend>,
    ) -> RealmResult<RealmId> {
        if let Some(home) = home {
            if home.header_size > 0 {
                self.space.fill(home.address, home.header_size, 0)?;
            }
        }

        let identity = backend.identity();
        let mut table = self.table.write();
        if let Some(parent) = parent {
            table.get(parent)?;
        }
        let id = table.insert(|id| RealmNode::new(id, parent, home, backend));
        if let Some(parent) = parent {
            table.link_child(parent, id)?;
        }
        debug!(realm = %id, parent = ?parent, identity, "realm created");
        Ok(id)
    }

    /// `create_realm` for a backend whose home block came from `parent`
    ///
    /// If the realm cannot be registered the home block goes back upstream
    /// and the registration error is returned.
    pub(crate) fn create_homed_realm(
        &self,
        parent: Option<RealmId>,
        home: RealmMemory,
        backend: Arc<dyn Backend>,
    ) -> RealmResult<RealmId> {
        let identity = backend.identity();
        let err = match self.create_realm(parent, Some(home), backend) {
            Ok(realm) => return Ok(realm),
            Err(e) => e,
        };
        if self.upstream_can_release(parent) {
            if let Err(release_err) = self.upstream_release(parent, home.address) {
                warn!(
                    identity,
                    home = home.address,
                    error = %err,
                    release_error = %release_err,
                    "failed to return home block of unregistered realm"
                );
            }
        }
        Err(err)
    }

    /// Backend handle and parent of a live realm
    fn dispatch(&self, realm: RealmId) -> RealmResult<(Arc<dyn Backend>, Option<RealmId>)> {
        let table = self.table.read();
        let node = table.get(realm)?;
        Ok((Arc::clone(&node.backend), node.parent))
    }

    fn require(backend: &Arc<dyn Backend>, operation: Operation) -> RealmResult<()> {
        if backend.supports(operation) {
            Ok(())
        } else {
            Err(RealmError::missing(operation, backend.identity()))
        }
    }

    /// Allocate `size` bytes; `Ok(None)` for a zero size or a declined request
    pub fn allocate(&self, realm: RealmId, size: Size) -> RealmResult<Option<Address>> {
        let (backend, parent) = self.dispatch(realm)?;
        Self::require(&backend, Operation::Allocate)?;
        if size == 0 {
            return Ok(None);
        }
        let ctx = RealmCtx::new(self, realm, parent);
        let result = backend.allocate(&ctx, size);
        trace!(%realm, size, ok = result.is_ok(), "allocate");
        self.abort_on_exhaustion(realm, result)
    }

    /// Allocate `size` zero-filled bytes
    pub fn zeroed_allocate(&self, realm: RealmId, size: Size) -> RealmResult<Option<Address>> {
        let (backend, parent) = self.dispatch(realm)?;
        Self::require(&backend, Operation::Allocate)?;
        if size == 0 {
            return Ok(None);
        }
        let ctx = RealmCtx::new(self, realm, parent);
        let result = if backend.supports(Operation::ZeroedAllocate) {
            backend.zeroed_allocate(&ctx, size)
        } else {
            backend.allocate(&ctx, size).and_then(|address| {
                if let Some(address) = address {
                    self.space.fill(address, size, 0)?;
                }
                Ok(address)
            })
        };
        self.abort_on_exhaustion(realm, result)
    }

    /// Resize a block: no block allocates, a zero size releases
    pub fn resize(
        &self,
        realm: RealmId,
        address: Option<Address>,
        size: Size,
    ) -> RealmResult<Option<Address>> {
        let Some(address) = address else {
            return self.allocate(realm, size);
        };
        if size == 0 {
            self.release(realm, address)?;
            return Ok(None);
        }
        let (backend, parent) = self.dispatch(realm)?;
        Self::require(&backend, Operation::Resize)?;
        let ctx = RealmCtx::new(self, realm, parent);
        let result = backend.resize(&ctx, address, size);
        self.abort_on_exhaustion(realm, result)
    }

    pub fn release(&self, realm: RealmId, address: Address) -> RealmResult<()> {
        let (backend, parent) = self.dispatch(realm)?;
        Self::require(&backend, Operation::Release)?;
        backend.release(&RealmCtx::new(self, realm, parent), address)
    }

    fn abort_on_exhaustion(
        &self,
        realm: RealmId,
        result: RealmResult<Option<Address>>,
    ) -> RealmResult<Option<Address>> {
        if let Err(e) = &result {
            if e.is_out_of_memory() {
                warn!(%realm, error = %e, "allocation failed");
                let hook = self.table.read().get(realm).ok().and_then(|node| node.abort);
                if let Some(hook) = hook {
                    hook(e);
                }
            }
        }
        result
    }

    /// Whether `ancestor` is `realm` itself or on its parent chain
    pub fn is_ancestor(&self, ancestor: RealmId, realm: RealmId) -> RealmResult<bool> {
        self.table.read().is_ancestor(ancestor, realm)
    }

    /// Take the realm's lock; realms without one need no locking
    pub fn lock(&self, realm: RealmId) -> RealmResult<()> {
        let (backend, parent) = self.dispatch(realm)?;
        if !backend.supports(Operation::Lock) {
            return Ok(());
        }
        backend.lock(&RealmCtx::new(self, realm, parent))
    }

    pub fn unlock(&self, realm: RealmId) -> RealmResult<()> {
        let (backend, parent) = self.dispatch(realm)?;
        if !backend.supports(Operation::Unlock) {
            return Ok(());
        }
        backend.unlock(&RealmCtx::new(self, realm, parent))
    }

    /// Announce `thread` to the realm and all of its ancestors
    pub fn thread_register(&self, realm: RealmId, thread: ThreadId) -> RealmResult<()> {
        let mut cursor = Some(realm);
        while let Some(current) = cursor {
            let (backend, parent) = {
                let mut table = self.table.write();
                let node = table.get_mut(current)?;
                node.threads += 1;
                (Arc::clone(&node.backend), node.parent)
            };
            if backend.supports(Operation::ThreadRegister) {
                backend.thread_register(&RealmCtx::new(self, current, parent), thread)?;
            }
            cursor = parent;
        }
        debug!(%realm, ?thread, "thread registered");
        Ok(())
    }

    pub fn thread_unregister(&self, realm: RealmId, thread: ThreadId) -> RealmResult<()> {
        let mut cursor = Some(realm);
        while let Some(current) = cursor {
            let (backend, parent) = {
                let mut table = self.table.write();
                let node = table.get_mut(current)?;
                node.threads = node.threads.saturating_sub(1);
                (Arc::clone(&node.backend), node.parent)
            };
            if backend.supports(Operation::ThreadUnregister) {
                backend.thread_unregister(&RealmCtx::new(self, current, parent), thread)?;
            }
            cursor = parent;
        }
        debug!(%realm, ?thread, "thread unregistered");
        Ok(())
    }

    /// Identity tag of the realm's backend
    pub fn identity(&self, realm: RealmId) -> RealmResult<&'static str> {
        Ok(self.table.read().get(realm)?.backend.identity())
    }

    pub fn supports(&self, realm: RealmId, operation: Operation) -> RealmResult<bool> {
        Ok(self.table.read().get(realm)?.backend.supports(operation))
    }

    /// Whether the realm can be reset (and therefore cascades cleanups)
    pub fn is_tracking(&self, realm: RealmId) -> RealmResult<bool> {
        self.supports(realm, Operation::Reset)
    }

    pub fn parent(&self, realm: RealmId) -> RealmResult<Option<RealmId>> {
        Ok(self.table.read().get(realm)?.parent)
    }

    /// Children, most recently created first
    pub fn children(&self, realm: RealmId) -> RealmResult<Vec<RealmId>> {
        self.table.read().children(realm)
    }

    pub fn accounting(&self, realm: RealmId) -> RealmResult<RealmId> {
        Ok(self.table.read().get(realm)?.accounting)
    }

    /// Point the realm's metadata at `accounting` (itself or a direct child)
    pub fn set_accounting(&self, realm: RealmId, accounting: RealmId) -> RealmResult<()> {
        let mut table = self.table.write();
        if accounting != realm && table.get(accounting)?.parent != Some(realm) {
            return Err(RealmError::invalid(format!(
                "{} is neither {} nor one of its children",
                accounting, realm
            )));
        }
        table.get_mut(realm)?.accounting = accounting;
        Ok(())
    }

    /// Install (or clear) the hook run when an allocation runs out of memory
    pub fn set_abort(&self, realm: RealmId, hook: Option<AbortFn>) -> RealmResult<()> {
        self.table.write().get_mut(realm)?.abort = hook;
        Ok(())
    }

    pub fn thread_count(&self, realm: RealmId) -> RealmResult<usize> {
        Ok(self.table.read().get(realm)?.threads)
    }

    pub fn stats(&self, realm: RealmId) -> RealmResult<RealmStats> {
        let (backend, parent) = self.dispatch(realm)?;
        let mut stats = backend.stats(&RealmCtx::new(self, realm, parent));
        stats.thread_count = self.thread_count(realm)?;
        Ok(stats)
    }

    /// Check the structural rules every realm must satisfy
    ///
    /// Violations are programmer errors and fire as debug assertions. A
    /// non-tracking realm with no tracking ancestor is legal but leaks on
    /// destroy unless released explicitly, so it is logged.
    pub fn validate(&self, realm: RealmId) -> RealmResult<()> {
        let table = self.table.read();
        let node = table.get(realm)?;
        let backend = &node.backend;
        let has = |operation| backend.supports(operation);

        debug_assert!(has(Operation::Allocate), "{realm} cannot allocate");
        debug_assert!(
            has(Operation::Release) || (has(Operation::Destroy) && has(Operation::Reset)),
            "{realm} can neither release nor reset"
        );
        debug_assert!(!has(Operation::Destroy) || has(Operation::Reset));
        debug_assert!(!has(Operation::Reset) || has(Operation::Destroy));
        debug_assert!(
            node.accounting == realm
                || table.get(node.accounting).ok().and_then(|acct| acct.parent) == Some(realm),
            "{realm} has a foreign accounting realm"
        );

        if node.parent.is_some() && !table.has_tracking_ancestor(realm) {
            warn!(
                %realm,
                identity = backend.identity(),
                "non-tracking realm created without a tracking ancestor"
            );
        }
        Ok(())
    }

    // Upstream memory: the parent realm when there is one, else the process heap

    pub(crate) fn upstream_allocate(&self, parent: Option<RealmId>, size: Size) -> RealmResult<Address> {
        match parent {
            Some(parent) => self
                .allocate(parent, size)?
                .ok_or_else(|| RealmError::out_of_memory(size, parent.to_string())),
            None => self.space.map(size),
        }
    }

    pub(crate) fn upstream_zeroed_allocate(
        &self,
        parent: Option<RealmId>,
        size: Size,
    ) -> RealmResult<Address> {
        match parent {
            Some(parent) => self
                .zeroed_allocate(parent, size)?
                .ok_or_else(|| RealmError::out_of_memory(size, parent.to_string())),
            None => self.space.map(size),
        }
    }

    pub(crate) fn upstream_release(&self, parent: Option<RealmId>, address: Address) -> RealmResult<()> {
        match parent {
            Some(parent) => self.release(parent, address),
            None => self.space.unmap(address).map(|_| ()),
        }
    }

    pub(crate) fn upstream_can_release(&self, parent: Option<RealmId>) -> bool {
        match parent {
            Some(parent) => self.supports(parent, Operation::Release).unwrap_or(false),
            None => true,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("realms", &self.realm_count())
            .field("memory", &self.space)
            .finish()
    }
}
