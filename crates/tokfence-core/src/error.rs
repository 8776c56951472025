//! Wire-level error kinds and core errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from core type construction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Provider name failed validation.
    #[error("invalid provider name: {name:?}")]
    InvalidProviderName {
        /// The offending name.
        name: String,
    },
}

/// The error-kind table surfaced over the wire and by the CLI.
///
/// Every failure a client can observe maps to exactly one kind; the HTTP
/// layer attaches the fixed status from [`ErrorKind::http_status`] and a
/// small JSON body `{"error": "<kind>", "message": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Configuration is malformed or unusable.
    ConfigInvalid,
    /// No credential stored for the provider.
    VaultNotFound,
    /// The vault backend refused to open (wrong passphrase).
    VaultLocked,
    /// The vault blob failed authentication or parsing.
    VaultCorrupt,
    /// The request path named a provider absent from configuration.
    UnknownProvider,
    /// The provider is revoked.
    ProviderRevoked,
    /// The per-provider token bucket is empty.
    RateLimited,
    /// A matching budget row would be exceeded.
    BudgetExceeded,
    /// Admission denied by the session risk state.
    RiskDenied,
    /// The capability header failed validation.
    InvalidCapability,
    /// The upstream could not be reached.
    UpstreamUnreachable,
    /// The upstream returned a non-success status.
    UpstreamStatus,
    /// PID-file identity verification failed.
    DaemonIdentityMismatch,
    /// No daemon is running.
    DaemonNotRunning,
    /// A daemon is already running.
    DaemonAlreadyRunning,
    /// A watcher usage fetch failed.
    FetchFailure,
    /// The local store failed.
    LocalStoreError,
    /// A caller-supplied argument is invalid.
    InvalidArgument,
}

impl ErrorKind {
    /// The wire name, identical to the variant name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "ConfigInvalid",
            Self::VaultNotFound => "VaultNotFound",
            Self::VaultLocked => "VaultLocked",
            Self::VaultCorrupt => "VaultCorrupt",
            Self::UnknownProvider => "UnknownProvider",
            Self::ProviderRevoked => "ProviderRevoked",
            Self::RateLimited => "RateLimited",
            Self::BudgetExceeded => "BudgetExceeded",
            Self::RiskDenied => "RiskDenied",
            Self::InvalidCapability => "InvalidCapability",
            Self::UpstreamUnreachable => "UpstreamUnreachable",
            Self::UpstreamStatus => "UpstreamStatus",
            Self::DaemonIdentityMismatch => "DaemonIdentityMismatch",
            Self::DaemonNotRunning => "DaemonNotRunning",
            Self::DaemonAlreadyRunning => "DaemonAlreadyRunning",
            Self::FetchFailure => "FetchFailure",
            Self::LocalStoreError => "LocalStoreError",
            Self::InvalidArgument => "InvalidArgument",
        }
    }

    /// Fixed HTTP status for responses generated by the daemon itself.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidCapability => 401,
            Self::ProviderRevoked => 403,
            Self::UnknownProvider => 404,
            Self::RateLimited | Self::BudgetExceeded => 429,
            Self::RiskDenied => 451,
            Self::UpstreamUnreachable => 502,
            Self::VaultNotFound | Self::VaultLocked | Self::VaultCorrupt => 503,
            Self::ConfigInvalid
            | Self::UpstreamStatus
            | Self::DaemonIdentityMismatch
            | Self::DaemonNotRunning
            | Self::DaemonAlreadyRunning
            | Self::FetchFailure
            | Self::LocalStoreError => 500,
            Self::InvalidArgument => 400,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(ErrorKind::BudgetExceeded.as_str(), "BudgetExceeded");
        assert_eq!(
            serde_json::to_string(&ErrorKind::RiskDenied).unwrap(),
            "\"RiskDenied\""
        );
    }

    #[test]
    fn test_status_table() {
        assert_eq!(ErrorKind::InvalidCapability.http_status(), 401);
        assert_eq!(ErrorKind::ProviderRevoked.http_status(), 403);
        assert_eq!(ErrorKind::UnknownProvider.http_status(), 404);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::BudgetExceeded.http_status(), 429);
        assert_eq!(ErrorKind::RiskDenied.http_status(), 451);
        assert_eq!(ErrorKind::UpstreamUnreachable.http_status(), 502);
        assert_eq!(ErrorKind::VaultLocked.http_status(), 503);
    }
}
