/*!
 * Monitoring
 * Tracing setup and lifecycle spans
 */

mod tracer;

pub use tracer::{init_tracing, span_lifecycle, LifecycleSpan, TRACE_JSON_ENV};
