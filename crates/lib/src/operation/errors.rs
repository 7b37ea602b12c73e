//! Error types for operations.

use thiserror::Error;

/// Errors raised while applying operations to a value.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The operation does not fit the value it was applied to.
    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },

    /// The requested capability is not offered by this service or operation type.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl OperationError {
    /// Shorthand for building an [`OperationError::InvalidOperation`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        OperationError::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Check if the operation was rejected because it does not fit the value.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, OperationError::InvalidOperation { .. })
    }

    /// Check if the capability is unsupported.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, OperationError::Unsupported(_))
    }
}

// Conversion from OperationError to the main Error type
impl From<OperationError> for crate::Error {
    fn from(err: OperationError) -> Self {
        crate::Error::Operation(err)
    }
}
