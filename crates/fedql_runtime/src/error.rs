//! Error taxonomy for query execution.

use crate::query::ResourceResults;
use std::time::Duration;
use thiserror::Error;

/// A failure while evaluating a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query text is malformed.
    #[error("invalid query: {0}")]
    Parse(#[from] fedql_syntax::ParseError),

    /// A semantic constraint is broken: unresolved chain, dependency cycle,
    /// duplicate resource identifier, invalid revision.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A saved query or tenant mapping is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The query deadline elapsed. Carries whatever results had completed.
    #[error("query timed out")]
    Timeout {
        /// Snapshot of the state at the moment the deadline fired.
        partial: ResourceResults,
    },

    /// A statement request failed and the statement does not ignore errors.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An unexpected internal failure (task join, poisoned channel).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A failure at the HTTP transport layer.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The statement deadline elapsed. Distinguished so the engine wraps a
    /// pseudo-response instead of failing the query.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The resource mapping did not assemble into a valid URL.
    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    /// Any other request failure.
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Returns true for the distinguished deadline variant.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout(_))
    }
}
