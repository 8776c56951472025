//! Platform-keyring vault backend.
//!
//! Each credential is a separate keyring item under the `tokfence`
//! service, keyed by provider name. The platform keyring cannot enumerate
//! items, so [`PlatformKeyringStore::list`] probes a candidate set (the
//! configured providers); callers display the intersection with their own
//! provider list.

use keyring::Entry;

use crate::error::{VaultError, VaultResult};
use crate::{KeyStore, validate_credential};

/// Keyring service name all Tokfence items live under.
const SERVICE: &str = "tokfence";

/// Vault backend over the operating system keyring.
pub struct PlatformKeyringStore {
    /// Providers probed by `list`.
    candidates: Vec<String>,
}

impl PlatformKeyringStore {
    /// Create a store; `candidates` is the provider set `list` probes.
    #[must_use]
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    fn entry(provider: &str) -> VaultResult<Entry> {
        Entry::new(SERVICE, provider).map_err(|e| VaultError::Backend(e.to_string()))
    }
}

impl KeyStore for PlatformKeyringStore {
    fn set(&self, provider: &str, credential: &str) -> VaultResult<()> {
        validate_credential(credential)?;
        Self::entry(provider)?
            .set_password(credential)
            .map_err(|e| VaultError::Backend(e.to_string()))
    }

    fn get(&self, provider: &str) -> VaultResult<String> {
        match Self::entry(provider)?.get_password() {
            Ok(credential) => Ok(credential),
            Err(keyring::Error::NoEntry) => Err(VaultError::NotFound {
                provider: provider.to_owned(),
            }),
            Err(e) => Err(VaultError::Backend(e.to_string())),
        }
    }

    fn delete(&self, provider: &str) -> VaultResult<()> {
        match Self::entry(provider)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VaultError::Backend(e.to_string())),
        }
    }

    fn list(&self) -> VaultResult<Vec<String>> {
        let mut present = Vec::new();
        for provider in &self.candidates {
            match Self::entry(provider)?.get_password() {
                Ok(_) => present.push(provider.clone()),
                Err(keyring::Error::NoEntry) => {},
                Err(e) => return Err(VaultError::Backend(e.to_string())),
            }
        }
        Ok(present)
    }
}

impl std::fmt::Debug for PlatformKeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformKeyringStore")
            .field("candidates", &self.candidates.len())
            .finish_non_exhaustive()
    }
}
