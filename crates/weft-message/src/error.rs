//! Error types for weft-message

use thiserror::Error;

/// Result type alias using weft-message Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while classifying or converting a message
#[derive(Error, Debug)]
pub enum Error {
    /// Input matches none of the recognized message shapes
    #[error("Unrecognized message input: {0}")]
    UnrecognizedInput(String),

    /// System messages are not conversation turns
    #[error("System messages cannot be added as conversation turns; use the system message API")]
    SystemMessage,

    /// A file payload could not be classified as inline data or a reference
    #[error("Unsupported file payload: {0}")]
    UnsupportedPayload(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an unrecognized-input error
    pub fn unrecognized(detail: impl Into<String>) -> Self {
        Self::UnrecognizedInput(detail.into())
    }

    /// Create an unsupported-payload error
    pub fn unsupported_payload(detail: impl Into<String>) -> Self {
        Self::UnsupportedPayload(detail.into())
    }

    /// Whether this error means the caller handed in something malformed.
    ///
    /// These are contract violations and are never worth retrying.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::UnrecognizedInput(_) | Error::SystemMessage | Error::UnsupportedPayload(_)
        )
    }
}
