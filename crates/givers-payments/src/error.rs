//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payments-provider errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// A credential the operation needs is not configured
    #[error("payments not configured: {0} is empty")]
    ConfigMissing(&'static str),

    /// The provider answered with HTTP >= 400
    #[error("provider rejected request: {0}")]
    UpstreamRejected(String),

    /// Network failure or timeout talking to the provider
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Signature timestamp outside the tolerance window
    #[error("webhook timestamp outside tolerance ({age_secs}s)")]
    ReplayTooOld { age_secs: i64 },

    /// Signature header is missing `t` or `v1`, or `t` is not a number
    #[error("malformed signature header: {0}")]
    MalformedSignature(String),

    /// No `v1` matched the computed MAC
    #[error("webhook signature mismatch")]
    SignatureMismatch,

    /// Provider payload could not be decoded
    #[error("provider payload parse error: {0}")]
    Parse(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Transport(_))
    }

    /// True for every way a webhook signature can fail
    pub fn is_signature_failure(&self) -> bool {
        matches!(
            self,
            PaymentError::ReplayTooOld { .. }
                | PaymentError::MalformedSignature(_)
                | PaymentError::SignatureMismatch
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::ConfigMissing(_) => "Payments are not available right now.",
            PaymentError::UpstreamRejected(_) => "The payment provider rejected the request.",
            PaymentError::Transport(_) => "Payment provider unreachable. Please try again.",
            _ => "An error occurred processing your request.",
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PaymentError::Parse(err.to_string())
        } else {
            PaymentError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Parse(err.to_string())
    }
}
