use thiserror::Error;

use pharmacy_core::DomainError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store operation error.
///
/// Domain failures coming out of the planning/validation step are folded into
/// the same kinds as storage-level failures, so callers see one error model
/// whichever backend rejected the write.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A referenced key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would break a uniqueness, referential or non-negativity rule.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Malformed input (empty names, zero deltas, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage engine failure unrelated to the data (I/O, corrupt rows, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::ConstraintViolation(_) => "constraint_violation",
            StoreError::Validation(_) => "validation",
            StoreError::Backend(_) => "backend",
        }
    }

    pub(crate) fn poisoned() -> Self {
        StoreError::Backend("lock poisoned".to_string())
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(msg) => StoreError::NotFound(msg),
            DomainError::ConstraintViolation(msg) => StoreError::ConstraintViolation(msg),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => StoreError::Validation(msg),
        }
    }
}
