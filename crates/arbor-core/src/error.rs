//! Error types for the arbor CMS engine.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using arbor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for arbor operations.
///
/// Domain errors (`*NotFound`, `*NotAllowed`) cross process boundaries
/// as-is so transport layers can map kind to status code deterministically.
/// Infrastructure failures inside a transaction are rolled back before
/// surfacing.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Category lookup by id found nothing
    #[error("Category not found: {0}")]
    CategoryNotFound(Uuid),

    /// One or more requested parent category ids did not resolve
    #[error("Parent category not found: {0}")]
    ParentCategoryNotFound(String),

    /// More than one parent id supplied while multi-parent mode is off
    #[error("Multiple parent categories are not allowed")]
    MultipleParentCategoryNotAllowed,

    /// The prospective parent set would create a cycle
    #[error("Circular category relation not allowed: {0}")]
    CircularCategoryNotAllowed(Uuid),

    /// Caller-correctable bad input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Misconfiguration (internal error class, not caller-correctable)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Composite batch key failed to decode; identifies the raw key
    #[error("Malformed batch key: {0:?}")]
    MalformedKey(String),

    /// A batch fetch failed; every pending key in the window fails uniformly
    #[error("Batch fetch failed: {0}")]
    Batch(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for domain errors that transport layers map to a 4xx status.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::CategoryNotFound(_)
                | Error::ParentCategoryNotFound(_)
                | Error::MultipleParentCategoryNotAllowed
                | Error::CircularCategoryNotAllowed(_)
                | Error::InvalidInput(_)
        )
    }
}
