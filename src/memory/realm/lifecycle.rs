/*!
 * Realm Lifecycle
 * Reset and destroy, with the cleanup cascade over descendants
 */

use super::cleanup::CleanupRecord;
use super::table::RealmTable;
use super::Runtime;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::types::{Operation, RealmId};
use crate::memory::traits::{Backend, RealmCtx};
use crate::monitoring::span_lifecycle;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One step of a cleanup cascade
enum Step {
    Cleanups(RealmId, Vec<CleanupRecord>),
    PreDestroy(RealmId, Option<RealmId>, Arc<dyn Backend>),
}

/// Visit order for a cascade: for every child, its own descendants first,
/// then its cleanups, then its pre-destroy hook
fn plan_children(table: &RealmTable, realm: RealmId, steps: &mut Vec<Step>) -> RealmResult<()> {
    for child in table.children(realm)? {
        plan_children(table, child, steps)?;
        let node = table.get(child)?;
        steps.push(Step::Cleanups(child, node.cleanups.iter().cloned().collect()));
        if node.backend.supports(Operation::PreDestroy) {
            steps.push(Step::PreDestroy(child, node.parent, Arc::clone(&node.backend)));
        }
    }
    Ok(())
}

impl Runtime {
    /// Run every descendant's cleanups (deepest first) and then the realm's own
    fn cascade(&self, realm: RealmId) -> RealmResult<()> {
        let steps = {
            let table = self.table.read();
            let mut steps = Vec::new();
            plan_children(&table, realm, &mut steps)?;
            let own = table.get(realm)?.cleanups.iter().cloned().collect();
            steps.push(Step::Cleanups(realm, own));
            steps
        };

        for step in steps {
            match step {
                Step::Cleanups(id, records) => {
                    for record in &records {
                        record.fire(id);
                    }
                }
                Step::PreDestroy(id, parent, backend) => {
                    if let Err(e) = backend.pre_destroy(&RealmCtx::new(self, id, parent)) {
                        warn!(realm = %id, error = %e, "pre-destroy failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Reclaim everything allocated from the realm in one go
    ///
    /// Cleanups of all descendants and of the realm run first; descendants
    /// are then detached (their ids go stale) and the backend reclaims the
    /// memory.
    pub fn reset(&self, realm: RealmId) -> RealmResult<()> {
        let span = span_lifecycle("reset", realm);
        let _entered = span.enter();
        let result = self.reset_inner(realm);
        span.record_result(result.is_ok());
        result
    }

    fn reset_inner(&self, realm: RealmId) -> RealmResult<()> {
        let (backend, parent) = self.dispatch(realm)?;
        Self::require(&backend, Operation::Reset)?;

        self.cascade(realm)?;
        let detached = {
            let mut table = self.table.write();
            let detached = table.remove_descendants(realm)?;
            let node = table.get_mut(realm)?;
            node.cleanups.clear();
            node.accounting = realm;
            detached.len()
        };

        backend.reset(&RealmCtx::new(self, realm, parent))?;
        info!(%realm, detached, "realm reset");
        Ok(())
    }

    /// Tear down a realm and everything below it
    pub fn destroy(&self, realm: RealmId) -> RealmResult<()> {
        let span = span_lifecycle("destroy", realm);
        let _entered = span.enter();
        let result = self.destroy_inner(realm);
        span.record_result(result.is_ok());
        result
    }

    fn destroy_inner(&self, realm: RealmId) -> RealmResult<()> {
        let (backend, parent) = self.dispatch(realm)?;

        if backend.supports(Operation::Reset) {
            self.cascade(realm)?;
            self.table.write().remove_descendants(realm)?;
        } else {
            self.destroy_untracked_contents(realm)?;
        }

        let node = {
            let mut table = self.table.write();
            table.unlink(realm)?;
            table.remove(realm)?
        };

        let ctx = RealmCtx::new(self, realm, parent);
        if backend.supports(Operation::PreDestroy) {
            backend.pre_destroy(&ctx)?;
        }

        // 1: the backend knows how to dispose of itself
        if backend.supports(Operation::Destroy) {
            backend.destroy(&ctx)?;
        } else if let Some(home) = node.home {
            match parent {
                // 2: a root frees itself
                None => backend.release(&ctx, home.address)?,
                // 3: hand the header back to a parent that can take it
                Some(parent) if self.upstream_can_release(Some(parent)) => {
                    self.release(parent, home.address)?
                }
                // 4: a tracking ancestor reclaims it on its own reset or destroy
                Some(parent) => {
                    debug_assert!(
                        self.table.read().has_tracking_ancestor(parent),
                        "{realm} has no tracking ancestor to reclaim it"
                    );
                }
            }
        }

        info!(%realm, identity = backend.identity(), "realm destroyed");
        Ok(())
    }

    /// Children, accounting realm and cleanups of a non-tracking realm
    fn destroy_untracked_contents(&self, realm: RealmId) -> RealmResult<()> {
        let accounting = {
            let mut table = self.table.write();
            let accounting = table.get(realm)?.accounting;
            if accounting != realm {
                // Destroyed explicitly below, after the cleanups it holds
                table.unlink(accounting)?;
            }
            accounting
        };

        let mut first_error: Option<RealmError> = None;
        for child in self.children(realm)? {
            if let Err(e) = self.destroy(child) {
                warn!(realm = %child, error = %e, "child destroy failed");
                first_error.get_or_insert(e);
            }
        }

        let records: Vec<CleanupRecord> = {
            let mut table = self.table.write();
            table.get_mut(realm)?.cleanups.drain(..).collect()
        };

        let accounting_tracks = accounting != realm && self.is_tracking(accounting).unwrap_or(false);
        for record in &records {
            record.fire(realm);
            if !accounting_tracks {
                self.uncharge(accounting, record.charge);
            }
        }
        debug!(%realm, cleanups = records.len(), "ran cleanups of non-tracking realm");

        if accounting != realm {
            self.destroy(accounting)?;
            self.table.write().get_mut(realm)?.accounting = realm;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
