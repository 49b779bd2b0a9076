//! Errors reported by port implementations
//!
//! Adapters translate backend failures into these tagged variants at the
//! port boundary, so the domain switches on a variant rather than on
//! backend-specific message text.

use thiserror::Error;

/// Errors from a `SessionProvider`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// There is no authenticated session (missing, expired or rejected token)
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// The identity provider could not be reached or answered unexpectedly
    #[error("Identity provider error: {0}")]
    Backend(String),
}

impl SessionError {
    /// Create an unauthenticated error with a message
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    /// Create a backend error with a message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Errors from a `UserDirectory`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row with the same key already exists (unique violation)
    #[error("Row already exists: {0}")]
    Duplicate(String),

    /// Any other store failure
    #[error("Store operation failed: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a duplicate-row error with a message
    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    /// Create a backend error with a message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// True if another writer already created the row
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Errors from an `ObjectStore`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// The write violated a constraint on the owner reference
    /// (typically the foreign key from stored objects to `users`)
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other storage failure
    #[error("Storage operation failed: {0}")]
    Other(String),
}

impl ObjectStoreError {
    /// Create a constraint violation error with a message
    pub fn constraint_violation(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    /// Create a generic storage error with a message
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True if the failure may clear once the owner row has replicated
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }

    /// The underlying message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            Self::ConstraintViolation(msg) | Self::Other(msg) => msg,
        }
    }
}
