//! Process-wide settings for the protection layer
//!
//! Every component receives a [`SecurityConfig`] at construction instead of
//! reading global state, so tests can point key stores and keyrings at
//! throwaway directories.

use crate::{CryptoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Block size of AES, which is also the CTR counter block length
pub const AES_BLOCK_SIZE: usize = 16;

/// scrypt cost parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// log2 of the CPU/memory cost `N`
    pub log_n: u8,
    /// Block size
    pub r: u32,
    /// Parallelism
    pub p: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

/// Settings shared by key custody, encrypted files and PGP environments
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// AES key length in bytes (16, 24 or 32)
    pub key_size: usize,
    /// CTR initial counter block length in bytes
    pub counter_nonce_size: usize,
    /// Directory holding key records (a ramdisk in production)
    pub key_store_dir: PathBuf,
    /// Filename prefix of key records
    pub key_file_prefix: String,
    /// Parent directory of ephemeral PGP keyrings
    pub pgp_root: PathBuf,
    /// Password hashing costs
    pub kdf: KdfConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("strongroom");
        Self {
            key_size: 32,
            counter_nonce_size: AES_BLOCK_SIZE,
            key_store_dir: base.join("keys"),
            key_file_prefix: "aeskey-".to_string(),
            pgp_root: base.join("pgp"),
            kdf: KdfConfig::default(),
        }
    }
}

impl SecurityConfig {
    /// Create a config rooted at the given working directory
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref();
        Self {
            key_store_dir: base.join("keys"),
            pgp_root: base.join("pgp"),
            ..Default::default()
        }
    }

    /// Set the key store directory
    pub fn with_key_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_store_dir = dir.into();
        self
    }

    /// Set the key file prefix
    pub fn with_key_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_file_prefix = prefix.into();
        self
    }

    /// Set the AES key size
    pub fn with_key_size(mut self, key_size: usize) -> Self {
        self.key_size = key_size;
        self
    }

    /// Set the PGP keyring root
    pub fn with_pgp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pgp_root = dir.into();
        self
    }

    /// Set the scrypt costs
    pub fn with_kdf(mut self, kdf: KdfConfig) -> Self {
        self.kdf = kdf;
        self
    }

    /// Check that the configured sizes are usable with AES-CTR
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.key_size, 16 | 24 | 32) {
            return Err(CryptoError::InvalidConfig(format!(
                "key_size must be 16, 24 or 32 bytes, got {}",
                self.key_size
            )));
        }
        if self.counter_nonce_size != AES_BLOCK_SIZE {
            return Err(CryptoError::InvalidConfig(format!(
                "counter_nonce_size must be {} bytes, got {}",
                AES_BLOCK_SIZE, self.counter_nonce_size
            )));
        }
        if self.key_file_prefix.contains(std::path::is_separator) {
            return Err(CryptoError::InvalidConfig(format!(
                "key_file_prefix must not contain a path separator: {}",
                self.key_file_prefix
            )));
        }
        Ok(())
    }
}
