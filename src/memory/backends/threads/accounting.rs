/*!
 * Threads Accounting Realm
 * Non-tracking child that keeps a threads realm's metadata in its shared pool
 */

use super::shared::SharedPool;
use super::slot::{split_owner, SHARED_SERIAL};
use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::THREADS_ACCT_HEADER_SIZE;
use crate::core::types::{Address, Operation, RealmId, Size};
use crate::memory::chunk::BlockHeader;
use crate::memory::realm::Runtime;
use crate::memory::traits::{Backend, RealmCtx};
use crate::memory::types::RealmStats;
use std::sync::Arc;

pub const THREADS_ACCT_IDENTITY: &str = "THREADS_ACCT";

pub(super) struct ThreadsAccounting {
    shared: Arc<SharedPool>,
    /// Parent of the threads realm, where the shared pool grows from
    upstream: Option<RealmId>,
}

impl ThreadsAccounting {
    /// Create the mirror under `owner` and make it the owner's accounting realm
    ///
    /// The mirror's header sits in the owner's home block at `header`, so the
    /// mirror has no home of its own to give back.
    pub fn attach(
        runtime: &Runtime,
        owner: RealmId,
        upstream: Option<RealmId>,
        shared: Arc<SharedPool>,
        header: Address,
    ) -> RealmResult<RealmId> {
        runtime.memory().fill(header, THREADS_ACCT_HEADER_SIZE, 0)?;
        let backend = Arc::new(Self { shared, upstream });
        let accounting = runtime.create_realm(Some(owner), None, backend)?;
        runtime.set_accounting(owner, accounting)?;
        runtime.validate(accounting)?;
        Ok(accounting)
    }
}

impl Backend for ThreadsAccounting {
    fn identity(&self) -> &'static str {
        THREADS_ACCT_IDENTITY
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::Allocate | Operation::Release)
    }

    fn allocate(&self, ctx: &RealmCtx<'_>, size: Size) -> RealmResult<Option<Address>> {
        self.shared
            .allocate(ctx.runtime(), self.upstream, size)
            .map(Some)
    }

    fn release(&self, ctx: &RealmCtx<'_>, address: Address) -> RealmResult<()> {
        let header = BlockHeader::read(ctx.memory(), address)?;
        let (serial, key) = split_owner(header.owner);
        if serial != SHARED_SERIAL {
            return Err(RealmError::invalid(format!(
                "0x{:x} is not accounting memory",
                address
            )));
        }
        self.shared
            .release(ctx.runtime(), self.upstream, address, key, header.size)
    }

    fn stats(&self, _ctx: &RealmCtx<'_>) -> RealmStats {
        let pool = self.shared.pool.lock();
        RealmStats {
            outstanding_bytes: pool.outstanding,
            live_blocks: pool.live_blocks,
            used_chunks: pool.used_chunks(),
            free_chunks: pool.free_chunks(),
            retained_bytes: pool.retained_bytes(),
            footprint: pool.footprint,
            ..RealmStats::new(THREADS_ACCT_IDENTITY)
        }
    }
}
