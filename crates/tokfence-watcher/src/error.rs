//! Watcher errors.

use thiserror::Error;

/// Errors from the usage reconciler.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Bad watcher configuration.
    #[error("invalid watcher config: {0}")]
    InvalidConfig(String),

    /// Every usage endpoint for a provider failed.
    #[error("usage fetch failed for {provider}: {detail}")]
    FetchFailure {
        /// The provider queried.
        provider: String,
        /// Last failure detail.
        detail: String,
    },

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] tokfence_store::StoreError),
}

/// Result type for watcher operations.
pub type WatcherResult<T> = Result<T, WatcherError>;
