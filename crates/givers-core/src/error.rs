//! Error Types

use thiserror::Error;

/// Result type alias for model parsing
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while decoding stored or wire values into domain types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A string did not name a known enum variant
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// A donor identity had an empty id
    #[error("donor id must not be empty")]
    EmptyDonorId,
}

impl ModelError {
    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}
