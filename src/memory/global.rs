/*!
 * Global Runtime
 *
 * Process-wide runtime with a permanent Standard root realm. Initialization
 * nests: every `initialize` needs a matching `terminate`, and only the last
 * one tears the root down.
 */

use super::backends::StandardBackend;
use super::realm::Runtime;
use crate::core::config::RuntimeConfig;
use crate::core::errors::{RealmError, RealmResult};
use crate::core::types::RealmId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

struct GlobalState {
    handle: GlobalRealm,
    nesting: usize,
}

static GLOBAL: Mutex<Option<GlobalState>> = parking_lot::const_mutex(None);

/// Handle on the process-wide runtime and its permanent root realm
#[derive(Debug, Clone)]
pub struct GlobalRealm {
    runtime: Arc<Runtime>,
    root: RealmId,
}

impl GlobalRealm {
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The permanent root realm
    pub fn root(&self) -> RealmId {
        self.root
    }
}

/// Set up the global runtime, or bump the nesting count if it exists
///
/// The runtime is configured from the environment (`REALM_HEAP_LIMIT`).
pub fn initialize() -> RealmResult<GlobalRealm> {
    let mut global = GLOBAL.lock();
    if let Some(state) = global.as_mut() {
        state.nesting += 1;
        return Ok(state.handle.clone());
    }

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from_env()?));
    let root = StandardBackend::create(&runtime)?;
    let handle = GlobalRealm { runtime, root };
    *global = Some(GlobalState {
        handle: handle.clone(),
        nesting: 1,
    });
    info!(%root, "global realm runtime initialized");
    Ok(handle)
}

/// Drop one level of initialization; the last one destroys the root realm
/// and everything still created under it
pub fn terminate() -> RealmResult<()> {
    let handle = {
        let mut global = GLOBAL.lock();
        let state = global
            .as_mut()
            .ok_or_else(|| RealmError::invalid("global realm runtime is not initialized"))?;
        state.nesting -= 1;
        if state.nesting > 0 {
            return Ok(());
        }
        match global.take() {
            Some(state) => state.handle,
            None => return Ok(()),
        }
    };

    handle.runtime.destroy(handle.root)?;
    info!(root = %handle.root, "global realm runtime terminated");
    Ok(())
}

/// The global runtime
pub fn global() -> RealmResult<GlobalRealm> {
    GLOBAL
        .lock()
        .as_ref()
        .map(|state| state.handle.clone())
        .ok_or_else(|| RealmError::invalid("global realm runtime is not initialized"))
}

/// Whether the global runtime is currently initialized
pub fn is_initialized() -> bool {
    GLOBAL.lock().is_some()
}
