/*!
 * Realm Tracing
 * Structured tracing for realm lifecycle operations using the tracing crate
 *
 * Features:
 * - Env-driven filtering through RUST_LOG
 * - JSON-formatted logs for structured parsing
 * - Timed spans around reset and destroy cascades
 */

use crate::core::types::RealmId;
use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable switching the subscriber to JSON output
pub const TRACE_JSON_ENV: &str = "REALM_TRACE_JSON";

/// Lifecycle operations slower than this are reported as warnings
const SLOW_LIFECYCLE_MS: u128 = 10;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - REALM_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "realm tracing initialized");
    }
    installed
}

/// Span timing one reset or destroy of a realm, cascade included
pub struct LifecycleSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
    realm: RealmId,
}

impl LifecycleSpan {
    pub fn new(operation: &'static str, realm: RealmId) -> Self {
        let span = span!(
            Level::DEBUG,
            "realm_lifecycle",
            operation = operation,
            realm = %realm,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
            realm,
        }
    }

    pub fn record_result(&self, success: bool) {
        self.span.record("result", if success { "success" } else { "error" });
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for LifecycleSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros());

        if duration.as_millis() > SLOW_LIFECYCLE_MS {
            warn!(
                operation = self.operation,
                realm = %self.realm,
                duration_ms = duration.as_millis(),
                slow = true,
                "slow realm lifecycle operation"
            );
        } else {
            debug!(
                operation = self.operation,
                realm = %self.realm,
                duration_us = duration.as_micros(),
                "realm lifecycle operation completed"
            );
        }
    }
}

/// Helper to open a lifecycle span
#[inline]
pub fn span_lifecycle(operation: &'static str, realm: RealmId) -> LifecycleSpan {
    LifecycleSpan::new(operation, realm)
}
