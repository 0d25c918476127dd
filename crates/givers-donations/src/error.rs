//! Donation Error Types
//!
//! The taxonomy every donation operation reports in. The HTTP layer maps each
//! variant to a status code and `{error: <code>}`.

use givers_payments::PaymentError;
use givers_store::StoreError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, DonationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DonationError {
    /// Bad input; the payload is a machine-readable reason
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Project or donation absent
    #[error("{0} not found")]
    NotFound(String),

    /// Ownership or host check failed
    #[error("forbidden")]
    Forbidden,

    /// Missing or invalid credentials, or a bad webhook signature
    #[error("unauthorized")]
    Unauthorized,

    /// The payments provider refused the request
    #[error("payments provider rejected the request: {0}")]
    UpstreamRejected(String),

    /// Network or database failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Idempotency collision that is not a safe duplicate
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected
    #[error("internal error: {0}")]
    Internal(String),

    /// No provider secret key configured
    #[error("payments are disabled")]
    PaymentsDisabled,
}

impl DonationError {
    pub(crate) fn invalid(reason: &str) -> Self {
        Self::ValidationFailed(reason.to_string())
    }

    /// Stable machine code
    pub fn code(&self) -> &'static str {
        match self {
            DonationError::ValidationFailed(_) => "validation_failed",
            DonationError::NotFound(_) => "not_found",
            DonationError::Forbidden => "forbidden",
            DonationError::Unauthorized => "unauthorized",
            DonationError::UpstreamRejected(_) => "upstream_rejected",
            DonationError::Transport(_) => "transport",
            DonationError::Conflict(_) => "conflict",
            DonationError::Internal(_) => "internal",
            DonationError::PaymentsDisabled => "payments_disabled",
        }
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DonationError::Transport(_))
    }
}

impl From<PaymentError> for DonationError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ConfigMissing(_) => DonationError::PaymentsDisabled,
            PaymentError::UpstreamRejected(msg) => DonationError::UpstreamRejected(msg),
            PaymentError::Transport(msg) => DonationError::Transport(msg),
            // Webhook bodies are mapped at the call site; anything else is a provider response
            PaymentError::Parse(detail) => {
                DonationError::Internal(format!("unreadable provider response: {detail}"))
            }
            PaymentError::ReplayTooOld { .. }
            | PaymentError::MalformedSignature(_)
            | PaymentError::SignatureMismatch => DonationError::Unauthorized,
        }
    }
}

impl From<StoreError> for DonationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => DonationError::NotFound(what),
            StoreError::Forbidden => DonationError::Forbidden,
            StoreError::Invalid(reason) => DonationError::ValidationFailed(reason),
            StoreError::Database(msg) => DonationError::Transport(msg),
            StoreError::Timeout => DonationError::Transport("database timeout".into()),
            StoreError::Model(e) => DonationError::Internal(e.to_string()),
        }
    }
}
