//! Service-level error model.

use thiserror::Error;

use lotkeeper_core::DomainError;

use crate::store::StoreError;

/// Error returned by every service operation.
///
/// Domain failures are deterministic and caller-correctable; store failures
/// are infrastructure problems. Neither is retried automatically, and a
/// failed operation never leaves partial writes behind.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A committed event could not be serialized into an envelope.
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ServiceError {
    /// Stable snake_case code for callers that map errors to responses.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(e) => match e {
                DomainError::Validation(_) | DomainError::InvalidId(_) => "validation_error",
                DomainError::NotFound { .. } => "not_found",
                DomainError::InvalidState(_) => "invalid_state",
                DomainError::InsufficientQuantity { .. } => "insufficient_quantity",
                DomainError::InsufficientStock { .. } => "insufficient_stock",
                DomainError::NoEligibleBatch { .. } => "no_eligible_batch",
                DomainError::InvariantViolation(_) => "invariant_violation",
                DomainError::Conflict(_) => "conflict",
            },
            ServiceError::Store(StoreError::Conflict(_)) => "conflict",
            ServiceError::Store(_) => "store_error",
            ServiceError::Encode(_) => "internal_error",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let cases: Vec<(ServiceError, &str)> = vec![
            (DomainError::validation("x").into(), "validation_error"),
            (DomainError::not_found("batch", "b1").into(), "not_found"),
            (DomainError::invalid_state("submitted").into(), "invalid_state"),
            (
                DomainError::InsufficientStock {
                    requested: 2,
                    available: 1,
                }
                .into(),
                "insufficient_stock",
            ),
            (DomainError::no_eligible_batch("p1").into(), "no_eligible_batch"),
            (StoreError::Conflict("stale".into()).into(), "conflict"),
            (StoreError::Backend("down".into()).into(), "store_error"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
        }
    }
}
