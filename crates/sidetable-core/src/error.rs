//! Error types for soft-attribute operations
//!
//! Every storage failure propagates unchanged to the caller of the
//! triggering operation; nothing is retried or swallowed here.

use thiserror::Error;

/// Error type for soft-attribute operations
#[derive(Error, Debug, Clone)]
pub enum AttributeError {
    /// Storage-layer failure during load, upsert, or delete
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Attribute value failed to encode to or decode from JSON
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Uniqueness constraint violation on (owner id, owner type, key)
    ///
    /// Surfaces concurrent duplicate-key races. Resolution (retry vs fail)
    /// is left to the caller.
    #[error("unique constraint violation: {0}")]
    Constraint(String),

    /// Invalid host or backend configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for soft-attribute operations
pub type AttributeResult<T> = Result<T, AttributeError>;

impl AttributeError {
    /// Create a generic backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a constraint-violation error
    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check whether the error is a duplicate-key race the caller may want
    /// to handle specially
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}
