//! Vault errors.

use thiserror::Error;

/// Errors raised by a [`crate::KeyStore`] backend.
///
/// Backend-specific details are deliberately not surfaced to proxy
/// clients; the daemon maps everything here to `VaultLocked`,
/// `VaultCorrupt`, or `VaultNotFound`.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No credential is stored for the provider.
    #[error("no credential stored for provider {provider:?}")]
    NotFound {
        /// The provider that was looked up.
        provider: String,
    },

    /// The vault exists but cannot be opened (wrong passphrase).
    #[error("vault is locked: passphrase does not match")]
    Locked,

    /// The vault blob failed parsing or authentication.
    #[error("vault data is corrupt: {0}")]
    Corrupt(String),

    /// An empty credential was supplied.
    #[error("credential must not be empty")]
    EmptyCredential,

    /// The encrypted-file backend needs a passphrase and none was given.
    #[error("vault passphrase is not set ({var} is empty)")]
    MissingPassphrase {
        /// The environment variable consulted.
        var: String,
    },

    /// Underlying I/O failure.
    #[error("vault I/O error: {0}")]
    Io(String),

    /// Platform keyring failure.
    #[error("keyring error: {0}")]
    Backend(String),
}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;
