//! ImmuneFence errors.

use thiserror::Error;

/// Errors from the security layer.
#[derive(Debug, Error)]
pub enum ImmuneError {
    /// A capability token failed validation.
    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    /// A mint argument was rejected.
    #[error("cannot mint capability: {0}")]
    MintRejected(String),
}

/// Result type for security operations.
pub type ImmuneResult<T> = Result<T, ImmuneError>;
