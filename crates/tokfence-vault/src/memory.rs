//! In-memory vault for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{VaultError, VaultResult};
use crate::{KeyStore, validate_credential};

/// Test-only vault holding credentials in a map.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with `(provider, credential)` pairs.
    #[must_use]
    pub fn with_credentials<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        Self {
            inner: Mutex::new(map),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn set(&self, provider: &str, credential: &str) -> VaultResult<()> {
        validate_credential(credential)?;
        self.inner
            .lock()
            .map_err(|_| VaultError::Io("lock poisoned".to_owned()))?
            .insert(provider.to_owned(), credential.to_owned());
        Ok(())
    }

    fn get(&self, provider: &str) -> VaultResult<String> {
        self.inner
            .lock()
            .map_err(|_| VaultError::Io("lock poisoned".to_owned()))?
            .get(provider)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                provider: provider.to_owned(),
            })
    }

    fn delete(&self, provider: &str) -> VaultResult<()> {
        self.inner
            .lock()
            .map_err(|_| VaultError::Io("lock poisoned".to_owned()))?
            .remove(provider);
        Ok(())
    }

    fn list(&self) -> VaultResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| VaultError::Io("lock poisoned".to_owned()))?
            .keys()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_round_trip() {
        let vault = MemoryKeyStore::new();
        vault.set("openai", "sk-1").unwrap();
        assert_eq!(vault.get("openai").unwrap(), "sk-1");
        vault.delete("openai").unwrap();
        assert!(matches!(
            vault.get("openai"),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn test_seeded() {
        let vault = MemoryKeyStore::with_credentials([("openai", "K")]);
        assert_eq!(vault.get("openai").unwrap(), "K");
    }
}
