/*!
 * Cleanup Chains
 *
 * Callbacks registered on a realm, run newest-first when the realm is reset
 * or destroyed. Each record is charged to the realm's accounting realm.
 */

use super::Runtime;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::CLEANUP_RECORD_SIZE;
use crate::core::types::{Address, CleanupType, Operation, RealmId};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque data handed to a cleanup callback
pub type CleanupData = Arc<dyn Any + Send + Sync>;

/// Cleanup callback
pub type CleanupFn = fn(&CleanupData) -> RealmResult<()>;

/// A registered cleanup
#[derive(Clone)]
pub(crate) struct CleanupRecord {
    pub kind: CleanupType,
    pub data: CleanupData,
    pub callback: CleanupFn,
    /// Memory charged to the accounting realm for this record
    pub charge: Option<Address>,
}

impl CleanupRecord {
    /// Type `0` matches every record
    fn matches_type(&self, kind: CleanupType) -> bool {
        kind == 0 || self.kind == kind
    }

    fn matches(&self, kind: CleanupType, data: &CleanupData, callback: CleanupFn) -> bool {
        self.matches_type(kind)
            && Arc::ptr_eq(&self.data, data)
            && self.callback as usize == callback as usize
    }

    /// Run the callback; failures are logged, never propagated
    pub fn fire(&self, realm: RealmId) {
        if let Err(e) = (self.callback)(&self.data) {
            warn!(%realm, kind = self.kind, error = %e, "cleanup callback failed");
        }
    }
}

impl std::fmt::Debug for CleanupRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRecord")
            .field("kind", &self.kind)
            .field("charge", &self.charge)
            .finish()
    }
}

impl Runtime {
    /// Register a cleanup to run when `realm` is reset or destroyed
    pub fn register_cleanup(
        &self,
        realm: RealmId,
        kind: CleanupType,
        data: CleanupData,
        callback: CleanupFn,
    ) -> RealmResult<()> {
        let accounting = self.accounting(realm)?;
        let charge = self
            .allocate(accounting, CLEANUP_RECORD_SIZE)?
            .ok_or_else(|| RealmError::out_of_memory(CLEANUP_RECORD_SIZE, accounting.to_string()))?;

        let mut table = self.table.write();
        match table.get_mut(realm) {
            Ok(node) => {
                node.cleanups.push_front(CleanupRecord {
                    kind,
                    data,
                    callback,
                    charge: Some(charge),
                });
                debug!(%realm, kind, "registered cleanup");
                Ok(())
            }
            Err(e) => {
                drop(table);
                self.uncharge(accounting, Some(charge));
                Err(e)
            }
        }
    }

    /// Remove every cleanup matching type, data and callback without running it
    pub fn unregister_cleanup(
        &self,
        realm: RealmId,
        kind: CleanupType,
        data: &CleanupData,
        callback: CleanupFn,
    ) -> RealmResult<()> {
        let removed = self.take_cleanups(realm, |record| record.matches(kind, data, callback))?;
        self.settle(realm, removed, false)
    }

    /// Remove every cleanup of a type (`0` for all) without running it
    pub fn unregister_cleanup_by_type(&self, realm: RealmId, kind: CleanupType) -> RealmResult<()> {
        let removed = self.take_cleanups(realm, |record| record.matches_type(kind))?;
        self.settle(realm, removed, false)
    }

    /// Unregister a cleanup and run its callback once
    pub fn run_cleanup(
        &self,
        realm: RealmId,
        kind: CleanupType,
        data: &CleanupData,
        callback: CleanupFn,
    ) -> RealmResult<()> {
        self.unregister_cleanup(realm, kind, data, callback)?;
        callback(data)
    }

    /// Run and remove every cleanup of a type (`0` for all), newest first
    pub fn run_cleanup_by_type(&self, realm: RealmId, kind: CleanupType) -> RealmResult<()> {
        let removed = self.take_cleanups(realm, |record| record.matches_type(kind))?;
        self.settle(realm, removed, true)
    }

    /// Number of cleanups registered on `realm`
    pub fn cleanup_count(&self, realm: RealmId) -> RealmResult<usize> {
        Ok(self.table.read().get(realm)?.cleanups.len())
    }

    fn take_cleanups(
        &self,
        realm: RealmId,
        mut predicate: impl FnMut(&CleanupRecord) -> bool,
    ) -> RealmResult<Vec<CleanupRecord>> {
        let mut table = self.table.write();
        let node = table.get_mut(realm)?;
        let mut removed = Vec::new();
        let mut kept = std::collections::VecDeque::with_capacity(node.cleanups.len());
        for record in node.cleanups.drain(..) {
            if predicate(&record) {
                removed.push(record);
            } else {
                kept.push_back(record);
            }
        }
        node.cleanups = kept;
        Ok(removed)
    }

    /// Optionally fire removed records, then give their charge back
    fn settle(&self, realm: RealmId, removed: Vec<CleanupRecord>, fire: bool) -> RealmResult<()> {
        if removed.is_empty() {
            return Err(RealmError::CleanupNotFound);
        }
        let accounting = self.accounting(realm)?;
        for record in removed {
            if fire {
                record.fire(realm);
            }
            self.uncharge(accounting, record.charge);
        }
        Ok(())
    }

    /// Free a record's charge if the accounting realm can release
    pub(crate) fn uncharge(&self, accounting: RealmId, charge: Option<Address>) {
        let Some(address) = charge else { return };
        if !self.supports(accounting, Operation::Release).unwrap_or(false) {
            return;
        }
        if let Err(e) = self.release(accounting, address) {
            warn!(realm = %accounting, error = %e, "failed to release cleanup record");
        }
    }
}
