//! Error types for weft-memory

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using weft-memory Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while accumulating, processing or persisting turns
#[derive(Error, Debug)]
pub enum Error {
    /// An error from classification or conversion
    #[error(transparent)]
    Message(#[from] weft_message::Error),

    /// A bound list received a turn for another thread or resource
    #[error("Turn belongs to {field} '{actual}' but the list is bound to '{expected}'")]
    TenantMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// A processor tripped the pipeline
    #[error("Aborted by {processor}: {reason}")]
    Aborted { processor: String, reason: String },

    /// A processor failed for a reason other than an abort
    #[error("Processor {processor} failed: {message}")]
    Processor { processor: String, message: String },

    /// The store rejected a write or read
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The write task ended without reporting an outcome
    #[error("Write task ended before reporting its outcome")]
    WriteDropped,
}

impl Error {
    /// Whether a processor intentionally halted the pipeline.
    ///
    /// Callers treat this as "blocked by policy", not as a crash.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// Check if this error came from the storage layer
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_) | Error::WriteDropped)
    }
}
