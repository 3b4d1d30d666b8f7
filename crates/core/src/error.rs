//! Domain and storage error model.
//!
//! Domain errors represent deterministic business failures (validation,
//! conflicts, missing aggregates). They are distinct from storage errors,
//! which cover the database adapters behind the unit-of-work ports.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error (business logic failures).
///
/// Keep this focused on deterministic failures. Infrastructure concerns
/// (connection drops, query failures) belong in [`StoreError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty or malformed).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. concurrent insert of the same key).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

/// Error surfaced by the storage adapters behind the unit-of-work ports.
///
/// `Duplicate` is recoverable: the loser of a concurrent inbox insert
/// re-checks the inbox and no-ops. Everything else rolls the unit of work
/// back and is retried by the caller (broker redelivery on the consumer
/// path, the next poll cycle on the publisher path).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique-key violation (e.g. concurrent insert of the same inbox key).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Any other database failure: connection, query, serialization.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn duplicate(key: impl Into<String>) -> Self {
        Self::Duplicate(key.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}
