//! Crate-local error type for the analytics core
//!
//! Mirrors `services_common::ServiceError`'s taxonomy but stays local so call
//! sites can match on the analytics-specific variants without pulling in the
//! workspace-wide enum. The `From` conversion below is available to other
//! in-process consumers of this crate; the HTTP layer maps variants to status
//! codes directly instead.

use thiserror::Error;

/// Errors produced by the analytics core
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required dependency was missing at construction time
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A numeric computation hit an undefined case
    #[error("numeric guard: {0}")]
    NumericGuard(String),

    /// A query was made against a component with no data yet
    #[error("precondition failed: {0}")]
    QueryPrecondition(String),

    /// A component has not finished initializing
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Caller-supplied input failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result alias used throughout the analytics core
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for services_common::ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvariantViolation(m) => Self::InvariantViolation(m),
            EngineError::NumericGuard(m) => Self::NumericGuard(m),
            EngineError::QueryPrecondition(m) => Self::QueryPrecondition(m),
            EngineError::ServiceUnavailable(m) => Self::ServiceUnavailable(m),
            EngineError::InvalidRequest(m) => Self::InvalidRequest(m),
        }
    }
}
