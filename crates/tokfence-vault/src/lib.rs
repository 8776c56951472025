//! Credential vault for Tokfence.
//!
//! One credential per provider, readable only at the moment of upstream
//! dispatch. Two production backends: the platform keyring (default) and
//! an Argon2id + AES-256-GCM encrypted file selected by setting
//! [`PASSPHRASE_ENV`]. Tests use [`MemoryKeyStore`].
//!
//! Credentials never appear in logs, snapshots, or error strings.

pub mod encrypted;
pub mod error;
pub mod keyring;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use encrypted::EncryptedFileStore;
pub use error::{VaultError, VaultResult};
pub use keyring::PlatformKeyringStore;
pub use memory::MemoryKeyStore;

/// Environment variable that unlocks the encrypted-file backend.
pub const PASSPHRASE_ENV: &str = "TOKFENCE_VAULT_PASSPHRASE";

/// File name of the encrypted vault inside the data directory.
pub const VAULT_FILE: &str = "vault.enc";

/// A credential store.
///
/// Implementations are internally serialized; `rotate` is semantically a
/// `set` and `delete` is idempotent.
pub trait KeyStore: Send + Sync {
    /// Store a credential, replacing any prior value.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EmptyCredential`] for an empty credential, or
    /// a backend error.
    fn set(&self, provider: &str, credential: &str) -> VaultResult<()>;

    /// Read a credential.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] when absent.
    fn get(&self, provider: &str) -> VaultResult<String>;

    /// Remove a credential. Removing an absent credential succeeds.
    ///
    /// # Errors
    ///
    /// Returns a backend error on I/O failure.
    fn delete(&self, provider: &str) -> VaultResult<()>;

    /// Providers with a stored credential.
    ///
    /// For the keyring backend this probes a candidate set and may miss
    /// providers added outside configuration; callers intersect with
    /// their own provider list when displaying.
    ///
    /// # Errors
    ///
    /// Returns a backend error on failure.
    fn list(&self) -> VaultResult<Vec<String>>;

    /// Replace a credential; identical to [`KeyStore::set`].
    ///
    /// # Errors
    ///
    /// Same as [`KeyStore::set`].
    fn rotate(&self, provider: &str, credential: &str) -> VaultResult<()> {
        self.set(provider, credential)
    }

    /// Export every stored credential as a map (for migration).
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered.
    fn export_all(&self) -> VaultResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for provider in self.list()? {
            out.insert(provider.clone(), self.get(&provider)?);
        }
        Ok(out)
    }

    /// Import credentials from a map, overwriting existing entries.
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered.
    fn import_all(&self, map: &BTreeMap<String, String>) -> VaultResult<()> {
        for (provider, credential) in map {
            self.set(provider, credential)?;
        }
        Ok(())
    }
}

/// Reject empty credentials before they reach a backend.
pub(crate) fn validate_credential(credential: &str) -> VaultResult<()> {
    if credential.is_empty() {
        return Err(VaultError::EmptyCredential);
    }
    Ok(())
}

/// Open the default backend for this environment.
///
/// With [`PASSPHRASE_ENV`] set, an [`EncryptedFileStore`] at
/// `<data_dir>/vault.enc`; otherwise the platform keyring probing
/// `candidates`.
///
/// # Errors
///
/// Returns a [`VaultError`] if the data directory cannot be resolved or
/// the passphrase is empty.
pub fn open_default(candidates: Vec<String>) -> VaultResult<Arc<dyn KeyStore>> {
    match std::env::var(PASSPHRASE_ENV) {
        Ok(passphrase) if !passphrase.is_empty() => {
            let dir = tokfence_config::data_dir().map_err(|e| VaultError::Io(e.to_string()))?;
            let store = EncryptedFileStore::new(dir.join(VAULT_FILE), &passphrase)?;
            Ok(Arc::new(store))
        },
        Ok(_) => Err(VaultError::MissingPassphrase {
            var: PASSPHRASE_ENV.to_owned(),
        }),
        Err(_) => Ok(Arc::new(PlatformKeyringStore::new(candidates))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_import_round_trip() {
        let a = MemoryKeyStore::new();
        a.set("openai", "sk-1").unwrap();
        a.set("anthropic", "ant-1").unwrap();

        let exported = a.export_all().unwrap();
        assert_eq!(exported.len(), 2);

        let b = MemoryKeyStore::new();
        b.import_all(&exported).unwrap();
        assert_eq!(b.get("openai").unwrap(), "sk-1");
        assert_eq!(b.get("anthropic").unwrap(), "ant-1");
    }

    #[test]
    fn test_rotate_is_set() {
        let vault = MemoryKeyStore::new();
        vault.set("openai", "old").unwrap();
        vault.rotate("openai", "new").unwrap();
        assert_eq!(vault.get("openai").unwrap(), "new");
    }
}
