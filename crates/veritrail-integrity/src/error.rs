//! Engine error types.
//!
//! Discovered tampering is never an error: broken chains, gaps, duplicates
//! and corruption instances are findings inside result objects. Errors are
//! reserved for the operation itself failing.

use thiserror::Error;
use veritrail_storage::StorageError;

use crate::accessor::AccessorError;

/// Errors returned by integrity operations.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// An event is missing required fields or carries malformed ones.
    #[error("structural error in {subject}: {reason}")]
    Structural {
        /// Event id or sequence the problem was found on.
        subject: String,
        /// What is wrong.
        reason: String,
    },

    /// The requested log, sequence, event or alert does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied arguments are out of bounds.
    #[error("validation error: {0}")]
    Validation(String),

    /// Infrastructure failure.
    #[error(transparent)]
    Operational(#[from] OperationalError),
}

/// Infrastructure failures. These are retried with backoff by the monitor
/// and surfaced immediately to synchronous callers.
#[derive(Debug, Error)]
pub enum OperationalError {
    /// A deadline expired before the operation could start.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The event store or state store could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Signing key material could not be loaded or used.
    #[error("key material error: {0}")]
    KeyMaterial(String),
}

impl IntegrityError {
    /// Shorthand for a [`IntegrityError::Structural`] error.
    pub fn structural(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Structural {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Operational(
                OperationalError::Timeout(_)
                    | OperationalError::Unavailable(_)
                    | OperationalError::Storage(_)
            )
        )
    }
}

impl From<AccessorError> for IntegrityError {
    fn from(err: AccessorError) -> Self {
        match err {
            AccessorError::NotFound(what) => Self::NotFound(what),
            AccessorError::Malformed { subject, reason } => Self::Structural { subject, reason },
            AccessorError::Unavailable(reason) => OperationalError::Unavailable(reason).into(),
        }
    }
}

impl From<StorageError> for IntegrityError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::InvalidKey(reason) => Self::Validation(reason),
            StorageError::Serialization(reason) => OperationalError::Serialization(reason).into(),
            StorageError::Unavailable(reason) => OperationalError::Unavailable(reason).into(),
            StorageError::Internal(reason) => OperationalError::Storage(reason).into(),
        }
    }
}

impl From<serde_json::Error> for IntegrityError {
    fn from(err: serde_json::Error) -> Self {
        OperationalError::Serialization(err.to_string()).into()
    }
}

/// Result type for integrity operations.
pub type IntegrityResult<T> = Result<T, IntegrityError>;
