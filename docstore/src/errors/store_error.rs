//! Store error taxonomy.
//!
//! Backend failures are translated into a small closed set of errors at the
//! persistence boundary so callers can branch on the kind of failure without
//! knowing anything about the backend.

use thiserror::Error;

/// Errors surfaced by store, search, and registry operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// An attempt to create or update an entity violated a constraint.
    /// Often expected behavior (duplicate identifier, version conflict).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A supplied identifier does not refer to a known entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller-supplied argument was not recognized (e.g. an unknown
    /// store route selector).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Something unexpected happened: a malformed request, a serialization
    /// failure, or any other backend-reported error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a generic backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Translate an HTTP status code from the backend into the error taxonomy.
///
/// 409 maps to [`StoreError::Conflict`], 404 to [`StoreError::NotFound`], and
/// everything else to [`StoreError::Backend`]. The `context` and `body` are
/// carried into the message for diagnostics.
pub fn translate_status(status: u16, context: &str, body: &str) -> StoreError {
    match status {
        409 => StoreError::conflict(context),
        404 => StoreError::not_found(context),
        _ => StoreError::backend(format!("{} failed with status {}: {}", context, status, body)),
    }
}
