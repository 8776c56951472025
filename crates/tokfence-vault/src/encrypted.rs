//! Encrypted-file vault backend.
//!
//! A single file holds every credential: a JSON envelope
//! `{version, salt, nonce, ciphertext}` where the ciphertext is the
//! AES-256-GCM encryption of a JSON `{provider: credential}` map. The key
//! is derived from a passphrase with Argon2id (t=3, m=192 MiB, p=4). The
//! salt is minted once per file; the nonce is fresh on every write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};
use crate::{KeyStore, validate_credential};

/// Envelope format version.
const VAULT_VERSION: u32 = 1;

/// Argon2id time cost.
const ARGON_T_COST: u32 = 3;
/// Argon2id memory cost in KiB (192 MiB).
const ARGON_M_COST_KIB: u32 = 196_608;
/// Argon2id parallelism.
const ARGON_P_COST: u32 = 4;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// File-backed vault encrypted with a passphrase.
///
/// A missing file is an empty vault. All operations serialize on an
/// internal lock; the derived key is cached after the first successful
/// unlock so Argon2 runs once per (process, salt).
pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: Zeroizing<String>,
    /// (salt, derived key) cache, filled on first use.
    key_cache: Mutex<Option<(Vec<u8>, Zeroizing<[u8; 32]>)>>,
}

impl EncryptedFileStore {
    /// Create a store over `path`, unlocked by `passphrase`.
    ///
    /// The passphrase is not checked here; the first read of a non-empty
    /// vault verifies it.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MissingPassphrase`] if the passphrase is
    /// empty.
    pub fn new(path: impl Into<PathBuf>, passphrase: &str) -> VaultResult<Self> {
        if passphrase.is_empty() {
            return Err(VaultError::MissingPassphrase {
                var: crate::PASSPHRASE_ENV.to_owned(),
            });
        }
        Ok(Self {
            path: path.into(),
            passphrase: Zeroizing::new(passphrase.to_owned()),
            key_cache: Mutex::new(None),
        })
    }

    fn derive_key(&self, salt: &[u8]) -> VaultResult<Zeroizing<[u8; 32]>> {
        let mut cache = self
            .key_cache
            .lock()
            .map_err(|_| VaultError::Io("vault lock poisoned".to_owned()))?;
        if let Some((cached_salt, key)) = cache.as_ref() {
            if cached_salt == salt {
                return Ok(key.clone());
            }
        }

        let params = argon2::Params::new(ARGON_M_COST_KIB, ARGON_T_COST, ARGON_P_COST, Some(32))
            .map_err(|e| VaultError::Corrupt(format!("bad argon2 params: {e}")))?;
        let argon = argon2::Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        );
        let mut key = Zeroizing::new([0u8; 32]);
        argon
            .hash_password_into(self.passphrase.as_bytes(), salt, key.as_mut())
            .map_err(|e| VaultError::Corrupt(format!("key derivation failed: {e}")))?;

        *cache = Some((salt.to_vec(), key.clone()));
        Ok(key)
    }

    /// Read and decrypt the credential map. Missing file ⇒ empty map.
    fn read_map(&self) -> VaultResult<(BTreeMap<String, String>, Option<Vec<u8>>)> {
        let raw = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((BTreeMap::new(), None));
            },
            Err(e) => return Err(VaultError::Io(e.to_string())),
        };

        let envelope: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| VaultError::Corrupt(format!("bad envelope: {e}")))?;
        if envelope.version != VAULT_VERSION {
            return Err(VaultError::Corrupt(format!(
                "unsupported vault version {}",
                envelope.version
            )));
        }

        let salt = BASE64
            .decode(&envelope.salt)
            .map_err(|e| VaultError::Corrupt(format!("bad salt: {e}")))?;
        let nonce = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| VaultError::Corrupt(format!("bad nonce: {e}")))?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| VaultError::Corrupt(format!("bad ciphertext: {e}")))?;
        if salt.len() != SALT_LEN || nonce.len() != NONCE_LEN {
            return Err(VaultError::Corrupt("bad salt or nonce length".to_owned()));
        }

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| VaultError::Corrupt(e.to_string()))?;
        // AEAD failure means either a wrong passphrase or tampering;
        // a wrong passphrase is by far the common case.
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
                .map_err(|_| VaultError::Locked)?,
        );

        let map: BTreeMap<String, String> = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupt(format!("bad credential map: {e}")))?;
        Ok((map, Some(salt)))
    }

    /// Encrypt and atomically persist the credential map.
    fn write_map(
        &self,
        map: &BTreeMap<String, String>,
        existing_salt: Option<Vec<u8>>,
    ) -> VaultResult<()> {
        let salt = match existing_salt {
            Some(s) => s,
            None => {
                let mut s = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut s);
                s
            },
        };
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let plaintext = Zeroizing::new(
            serde_json::to_vec(map).map_err(|e| VaultError::Io(e.to_string()))?,
        );
        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| VaultError::Corrupt(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| VaultError::Io(format!("encryption failed: {e}")))?;

        let envelope = Envelope {
            version: VAULT_VERSION,
            salt: BASE64.encode(&salt),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(&ciphertext),
        };
        let rendered =
            serde_json::to_vec(&envelope).map_err(|e| VaultError::Io(e.to_string()))?;

        self.atomic_write(&rendered)
    }

    /// tmp (0600) + fsync + rename; the parent directory is forced to 0700.
    fn atomic_write(&self, contents: &[u8]) -> VaultResult<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| VaultError::Io(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| VaultError::Io(e.to_string()))?;
        }

        let tmp = self.path.with_extension("enc.tmp");
        {
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options
                .open(&tmp)
                .map_err(|e| VaultError::Io(e.to_string()))?;
            file.write_all(contents)
                .map_err(|e| VaultError::Io(e.to_string()))?;
            file.sync_all().map_err(|e| VaultError::Io(e.to_string()))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| VaultError::Io(e.to_string()))
    }
}

impl KeyStore for EncryptedFileStore {
    fn set(&self, provider: &str, credential: &str) -> VaultResult<()> {
        validate_credential(credential)?;
        let (mut map, salt) = self.read_map()?;
        map.insert(provider.to_owned(), credential.to_owned());
        self.write_map(&map, salt)
    }

    fn get(&self, provider: &str) -> VaultResult<String> {
        let (map, _) = self.read_map()?;
        map.get(provider)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                provider: provider.to_owned(),
            })
    }

    fn delete(&self, provider: &str) -> VaultResult<()> {
        let (mut map, salt) = self.read_map()?;
        if map.remove(provider).is_some() {
            self.write_map(&map, salt)?;
        }
        Ok(())
    }

    fn list(&self) -> VaultResult<Vec<String>> {
        let (map, _) = self.read_map()?;
        Ok(map.keys().cloned().collect())
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir, passphrase: &str) -> EncryptedFileStore {
        EncryptedFileStore::new(dir.path().join("vault.enc"), passphrase).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = store(&dir, "hunter2");
        vault.set("openai", "sk-secret").unwrap();
        vault.set("anthropic", "ant-secret").unwrap();

        assert_eq!(vault.get("openai").unwrap(), "sk-secret");
        assert_eq!(vault.list().unwrap(), vec!["anthropic", "openai"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vault = store(&dir, "pw");
        assert!(vault.list().unwrap().is_empty());
        assert!(matches!(
            vault.get("openai"),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn test_overwrite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let vault = store(&dir, "pw");
        vault.set("openai", "first").unwrap();
        vault.set("openai", "second").unwrap();
        assert_eq!(vault.get("openai").unwrap(), "second");

        vault.delete("openai").unwrap();
        assert!(vault.get("openai").is_err());
        // Idempotent.
        vault.delete("openai").unwrap();
    }

    #[test]
    fn test_empty_credential_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = store(&dir, "pw");
        assert!(matches!(
            vault.set("openai", ""),
            Err(VaultError::EmptyCredential)
        ));
    }

    #[test]
    fn test_wrong_passphrase_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, "right").set("openai", "sk-x").unwrap();

        let wrong = store(&dir, "wrong");
        assert!(matches!(wrong.get("openai"), Err(VaultError::Locked)));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        std::fs::write(&path, b"not json at all").unwrap();
        let vault = EncryptedFileStore::new(path, "pw").unwrap();
        assert!(matches!(vault.list(), Err(VaultError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let vault = store(&dir, "pw");
        vault.set("openai", "sk-x").unwrap();
        let mode = std::fs::metadata(dir.path().join("vault.enc"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_credential_not_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let vault = store(&dir, "pw");
        vault.set("openai", "sk-super-secret-value").unwrap();
        let raw = std::fs::read(dir.path().join("vault.enc")).unwrap();
        let raw_str = String::from_utf8_lossy(&raw);
        assert!(!raw_str.contains("sk-super-secret-value"));
        assert!(!raw_str.contains("openai"));
    }
}
