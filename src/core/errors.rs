/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{Operation, RealmId, Size};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for realm operations
pub type RealmResult<T> = Result<T, RealmError>;

/// Realm framework errors with serialization support
///
/// `OutOfMemory` is resource exhaustion; `InvalidRealm`, `MissingOperation`
/// and `InvalidArgument` are caller bugs; `CleanupNotFound` is a
/// bookkeeping miss and never fatal.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum RealmError {
    #[error("Out of memory: {requested} bytes could not be obtained by {realm}")]
    #[diagnostic(
        code(realm::out_of_memory),
        help("The parent realm or the process heap is exhausted. Release memory or raise the heap limit.")
    )]
    OutOfMemory { requested: Size, realm: String },

    #[error("Invalid realm: {0}")]
    #[diagnostic(
        code(realm::invalid_realm),
        help("The realm was destroyed, detached by a parent reset, or never existed.")
    )]
    InvalidRealm(RealmId),

    #[error("Realm backend {identity} does not provide {operation}")]
    #[diagnostic(
        code(realm::missing_operation),
        help("Non-tracking realms cannot be reset; check the backend's capabilities before calling.")
    )]
    MissingOperation { operation: Operation, identity: String },

    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(realm::invalid_argument),
        help("The address or parameter does not belong to this realm.")
    )]
    InvalidArgument(String),

    #[error("Cleanup not found")]
    #[diagnostic(
        code(realm::cleanup_not_found),
        help("No registered cleanup matched the given type, data and callback.")
    )]
    CleanupNotFound,
}

impl RealmError {
    pub(crate) fn missing(operation: Operation, identity: &str) -> Self {
        RealmError::MissingOperation {
            operation,
            identity: identity.to_string(),
        }
    }

    pub(crate) fn out_of_memory(requested: Size, realm: impl Into<String>) -> Self {
        RealmError::OutOfMemory {
            requested,
            realm: realm.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RealmError::InvalidArgument(message.into())
    }

    /// Whether this error reports resource exhaustion rather than misuse
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, RealmError::OutOfMemory { .. })
    }
}
