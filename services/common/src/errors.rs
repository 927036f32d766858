//! Crate-wide error type shared by every analytics component
//!
//! Mirrors the error-kind taxonomy the analytics core is designed around:
//! transient I/O is recovered by callers before it ever reaches here,
//! everything below is either a construction-time failure or a query
//! against a producer that has not reported data yet.

use thiserror::Error;

/// Errors surfaced by the analytics core's components and query layer
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required dependency was missing at construction time
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A numeric computation hit an undefined case (division by zero, empty window)
    #[error("numeric guard: {0}")]
    NumericGuard(String),

    /// A query was made against a component with no data yet
    #[error("precondition failed: {0}")]
    QueryPrecondition(String),

    /// A component is not yet initialized
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Input failed validation before reaching a component
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything else, carrying the original message for diagnostics
    #[error("internal error: {0}")]
    InternalError(String),
}
