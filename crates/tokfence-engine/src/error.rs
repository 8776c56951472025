//! Enforcement errors.

use thiserror::Error;
use tokfence_store::Period;

/// Errors from the budget engine and rate limiter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A matching budget row would be exceeded by the planned charge.
    #[error(
        "budget exceeded for {scope} ({period}): spent {current_spend_cents} of {limit_cents}"
    )]
    BudgetExceeded {
        /// The row's scope (provider or "global").
        scope: String,
        /// The row's period.
        period: Period,
        /// The cap, hundredths of a cent.
        limit_cents: i64,
        /// Spend so far this period, hundredths of a cent.
        current_spend_cents: i64,
    },

    /// A caller-supplied argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] tokfence_store::StoreError),
}

/// Result type for enforcement operations.
pub type EngineResult<T> = Result<T, EngineError>;
