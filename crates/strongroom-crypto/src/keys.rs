//! Key custody for encrypted uploads
//!
//! Every encrypted file gets its own AES key and counter nonce. The pair is
//! persisted as a small JSON record at
//! `<key_store_dir>/<key_file_prefix><key_id>`, where `key_id` is a random
//! alphanumeric token that also names the ciphertext file.

use crate::{CryptoError, Result, SecurityConfig};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of a generated key id
pub const KEY_ID_LEN: usize = 16;

/// Upper bound on id regeneration when the key store keeps colliding
const MAX_MINT_ATTEMPTS: usize = 64;

/// Symmetric key material bound to a key id
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyRecord {
    key_id: String,
    key: Vec<u8>,
    counter_nonce: Vec<u8>,
}

impl KeyRecord {
    /// The id naming both the key record and the ciphertext
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The AES key
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The initial CTR counter block
    pub fn counter_nonce(&self) -> &[u8] {
        &self.counter_nonce
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// On-disk layout of a key record
#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(with = "base64_serde")]
    key: Vec<u8>,
    #[serde(with = "base64_serde")]
    key_counter_nonce: Vec<u8>,
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.key.zeroize();
        self.key_counter_nonce.zeroize();
    }
}

/// Mints, loads and destroys key records in the configured key store
#[derive(Clone, Debug)]
pub struct KeyCustody {
    config: SecurityConfig,
}

impl KeyCustody {
    /// Create a custodian after validating the configured sizes
    pub fn new(config: SecurityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Custodian that skips size validation
    #[cfg(test)]
    pub(crate) fn unchecked(config: SecurityConfig) -> Self {
        Self { config }
    }

    /// The configuration this custodian was built with
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Path of the record for `key_id`
    pub fn key_path(&self, key_id: &str) -> PathBuf {
        self.config
            .key_store_dir
            .join(format!("{}{}", self.config.key_file_prefix, key_id))
    }

    /// Generate a fresh key under a previously unused key id and persist it.
    ///
    /// The record is created with `create_new`, so the collision probe and
    /// the creation are a single atomic step; a concurrent minter that picked
    /// the same id simply loses and draws again.
    pub fn mint(&self) -> Result<KeyRecord> {
        self.mint_with(&mut OsRng)
    }

    /// Like [`mint`](Self::mint), drawing key ids from `id_rng`. Key
    /// material always comes from the OS generator.
    #[instrument(skip(self, id_rng), fields(store = %self.config.key_store_dir.display()))]
    pub(crate) fn mint_with<R: RngCore + ?Sized>(&self, id_rng: &mut R) -> Result<KeyRecord> {
        fs::create_dir_all(&self.config.key_store_dir).map_err(|e| CryptoError::KeyPersist {
            path: self.config.key_store_dir.clone(),
            reason: e.to_string(),
        })?;

        let key = random_bytes(self.config.key_size)?;
        let counter_nonce = random_bytes(self.config.counter_nonce_size)?;
        let contents = Zeroizing::new(serde_json::to_vec(&KeyFile {
            key: key.clone(),
            key_counter_nonce: counter_nonce.clone(),
        })?);

        for _ in 0..MAX_MINT_ATTEMPTS {
            let key_id = generate_key_id(id_rng);
            let path = self.key_path(&key_id);

            let mut file = match create_exclusive(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(key_id = %key_id, "Key id already taken, regenerating");
                    continue;
                }
                Err(e) => {
                    return Err(CryptoError::KeyPersist {
                        path,
                        reason: e.to_string(),
                    })
                }
            };

            debug!(path = %path.display(), "Key initialization");
            if let Err(e) = file.write_all(&contents).and_then(|_| file.sync_all()) {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove_err, "Unable to remove partial key file");
                }
                return Err(CryptoError::KeyPersist {
                    path,
                    reason: e.to_string(),
                });
            }

            if !path.is_file() {
                error!(path = %path.display(), "Unable to write keyfile");
                return Err(CryptoError::KeyPersist {
                    path,
                    reason: "key file missing after write".to_string(),
                });
            }

            return Ok(KeyRecord {
                key_id,
                key,
                counter_nonce,
            });
        }

        Err(CryptoError::KeyGeneration(format!(
            "no unused key id after {} attempts",
            MAX_MINT_ATTEMPTS
        )))
    }

    /// Read and decode the record for `key_id`
    #[instrument(skip(self))]
    pub fn load(&self, key_id: &str) -> Result<KeyRecord> {
        if !is_valid_key_id(key_id) {
            return Err(CryptoError::key_load(key_id, "malformed key id"));
        }

        let path = self.key_path(key_id);
        let contents = fs::read(&path).map_err(|e| {
            error!(
                path = %path.display(),
                error = %e,
                "File has been encrypted with a lost or invalid key"
            );
            CryptoError::key_load(key_id, e)
        })?;
        let key_file: KeyFile =
            serde_json::from_slice(&contents).map_err(|e| CryptoError::key_load(key_id, e))?;

        if key_file.key.len() != self.config.key_size {
            return Err(CryptoError::key_load(
                key_id,
                format!(
                    "key must be {} bytes, got {}",
                    self.config.key_size,
                    key_file.key.len()
                ),
            ));
        }
        if key_file.key_counter_nonce.len() != self.config.counter_nonce_size {
            return Err(CryptoError::key_load(
                key_id,
                format!(
                    "counter nonce must be {} bytes, got {}",
                    self.config.counter_nonce_size,
                    key_file.key_counter_nonce.len()
                ),
            ));
        }

        Ok(KeyRecord {
            key_id: key_id.to_string(),
            key: key_file.key.clone(),
            counter_nonce: key_file.key_counter_nonce.clone(),
        })
    }

    /// Remove the record for `key_id`; absent records are not an error
    pub fn destroy(&self, key_id: &str) -> Result<()> {
        if !is_valid_key_id(key_id) {
            return Err(CryptoError::key_load(key_id, "malformed key id"));
        }

        let path = self.key_path(key_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed key file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Key ids are plain alphanumeric tokens of the generated length
pub fn is_valid_key_id(key_id: &str) -> bool {
    key_id.len() == KEY_ID_LEN && key_id.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub(crate) fn generate_key_id<R: RngCore + ?Sized>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(KEY_ID_LEN)
        .map(char::from)
        .collect()
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok(bytes)
}

fn create_exclusive(path: &Path) -> std::io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

mod base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
