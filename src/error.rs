use crate::domain::payment::{PaymentId, PaymentStatus, Provider};
use std::collections::BTreeMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Reasons a confirmation token can be rejected at charge time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("confirmation token not found")]
    NotFound,
    #[error("confirmation token has expired")]
    Expired,
    #[error("confirmation token does not match the requested amount")]
    AmountMismatch,
    #[error("confirmation token was already consumed")]
    AlreadyConsumed,
}

/// Failures reported by (or on behalf of) a provider adapter.
///
/// Timeouts are kept distinct from provider-reported declines so the audit
/// trail can tell them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("provider declined the payment ({code})")]
    Declined { code: String, message: String },
    #[error("provider network error: {0}")]
    Network(String),
    #[error("malformed provider payload: {0}")]
    InvalidPayload(String),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("validation failed: {}", field_summary(.0))]
    Validation(BTreeMap<String, String>),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("attempt limit exceeded, retry in {retry_after_secs}s")]
    AttemptLimitExceeded { retry_after_secs: i64 },
    #[error("illegal payment state transition {from} -> {to}")]
    InvalidStateTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("unsupported payment provider: {0}")]
    UnsupportedProvider(Provider),
    #[error("payment processing failed")]
    Provider(#[from] ProviderError),
    #[error("payment {0} not found")]
    NotFound(PaymentId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaymentError {
    /// Stable machine-readable code, safe to surface to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Token(TokenError::NotFound) => "TOKEN_NOT_FOUND",
            Self::Token(TokenError::Expired) => "TOKEN_EXPIRED",
            Self::Token(TokenError::AmountMismatch) => "TOKEN_AMOUNT_MISMATCH",
            Self::Token(TokenError::AlreadyConsumed) => "TOKEN_ALREADY_CONSUMED",
            Self::AttemptLimitExceeded { .. } => "ATTEMPT_LIMIT_EXCEEDED",
            Self::InvalidStateTransition { .. } => "INVALID_STATE",
            Self::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::NotFound(_) => "PAYMENT_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Convenience constructor for a single-field validation error.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), message.into());
        Self::Validation(errors)
    }
}

/// Lists the offending field names without their values.
fn field_summary(errors: &BTreeMap<String, String>) -> String {
    errors.keys().cloned().collect::<Vec<_>>().join(", ")
}
