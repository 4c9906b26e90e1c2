//! Unified error handling for cholforge
//!
//! Every failure mode of the factorization pipeline is represented by a
//! distinct, inspectable variant. Nothing is retried automatically: an
//! undetected failure in one block would poison every dependent trailing
//! update, so the first error always aborts the whole call.

use thiserror::Error;

/// Unified error type for cholforge.
#[derive(Debug, Clone, Error)]
pub enum CholForgeError {
    /// The accelerator backend is not compiled in or not available.
    /// Always checked first, before any work is issued.
    #[error("accelerator backend not available (crate built without the `rocm` feature)")]
    UnsupportedDevice,

    /// Malformed handle, non-positive dimension, inconsistent block plan,
    /// or a device id that is not present in the registry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A block set exceeded a device's reported free memory and no
    /// eviction path could resolve it.
    #[error(
        "device {device_id} out of memory: requested {requested} bytes, {available} available"
    )]
    OutOfMemory {
        device_id: i32,
        requested: usize,
        available: usize,
    },

    /// A diagonal block factorization detected a non-positive leading
    /// minor. Carries the failing block-column index.
    #[error("matrix is not positive definite (failed at block column {block})")]
    NotPositiveDefinite { block: usize },

    /// The underlying solver or transfer layer reported a native failure.
    #[error("device error: {0}")]
    DeviceError(String),
}

/// Coarse classification of an error, for callers that dispatch on
/// recoverability rather than on the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller mistake: fix the inputs and call again.
    User,
    /// Resource exhaustion: may succeed with a different block plan.
    Resource,
    /// Numeric failure: property of the input matrix, not of the system.
    Numeric,
    /// Backend failure: native runtime or missing accelerator support.
    Backend,
}

impl CholForgeError {
    /// Categorize this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CholForgeError::InvalidArgument(_) => ErrorCategory::User,
            CholForgeError::OutOfMemory { .. } => ErrorCategory::Resource,
            CholForgeError::NotPositiveDefinite { .. } => ErrorCategory::Numeric,
            CholForgeError::UnsupportedDevice | CholForgeError::DeviceError(_) => {
                ErrorCategory::Backend
            }
        }
    }

    /// Whether re-invoking with a different block allocation could help.
    /// Only `OutOfMemory` qualifies; everything else is either a caller
    /// bug, a numeric property of the input, or a broken backend.
    pub fn retryable_with_new_plan(&self) -> bool {
        matches!(self, CholForgeError::OutOfMemory { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for CholForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CholForgeError::DeviceError(format!("internal lock poisoned: {err}"))
    }
}

/// Result alias used throughout the crate.
pub type CholResult<T> = Result<T, CholForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_variants() {
        assert_eq!(
            CholForgeError::InvalidArgument("lda < n".into()).category(),
            ErrorCategory::User
        );
        assert_eq!(
            CholForgeError::OutOfMemory {
                device_id: 0,
                requested: 128,
                available: 64
            }
            .category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            CholForgeError::NotPositiveDefinite { block: 3 }.category(),
            ErrorCategory::Numeric
        );
        assert_eq!(
            CholForgeError::UnsupportedDevice.category(),
            ErrorCategory::Backend
        );
    }

    #[test]
    fn only_oom_is_retryable() {
        assert!(CholForgeError::OutOfMemory {
            device_id: 1,
            requested: 2,
            available: 1
        }
        .retryable_with_new_plan());
        assert!(!CholForgeError::NotPositiveDefinite { block: 0 }.retryable_with_new_plan());
        assert!(!CholForgeError::UnsupportedDevice.retryable_with_new_plan());
    }

    #[test]
    fn not_positive_definite_reports_block() {
        let err = CholForgeError::NotPositiveDefinite { block: 2 };
        assert!(err.to_string().contains("block column 2"));
    }
}
