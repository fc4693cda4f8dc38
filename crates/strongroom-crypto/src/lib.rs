//! # Strongroom Crypto
//!
//! At-rest data protection for a platform that receives sensitive uploads.
//!
//! This crate provides:
//! - **Encrypted files**: AES-CTR encrypt-on-write / decrypt-on-read streams
//! - **Key custody**: per-file keys persisted in a dedicated key store
//! - **Secure erase**: multi-pass overwrite before unlinking
//! - **Password hashing**: scrypt followed by SHA-512
//! - **Path containment**: segment-aware directory traversal checks
//! - **PGP delivery**: ephemeral keyrings for re-encrypting to a recipient
//!
//! ## Security Model
//!
//! - Uploaded content never touches the disk in plaintext
//! - Losing a key record makes its ciphertext unrecoverable, so deleting the
//!   record is enough to retire a temporary upload
//! - Each PGP delivery runs in its own throwaway keyring
//!
//! ## Example
//!
//! ```rust,ignore
//! use strongroom_crypto::{EncryptedFile, KeyCustody, SecurityConfig};
//!
//! let custody = KeyCustody::new(SecurityConfig::default())?;
//!
//! let mut upload = EncryptedFile::create(&custody, "/srv/uploads")?;
//! upload.write_chunk(b"hello world")?;
//! upload.avoid_delete();
//! upload.close();
//!
//! let mut stored = EncryptedFile::open_existing(&custody, upload.path())?;
//! assert_eq!(stored.read_all()?, b"hello world");
//! ```

pub mod config;
pub mod encrypted_file;
pub mod erase;
pub mod error;
pub mod keys;
pub mod openpgp;
pub mod password;
pub mod path_guard;

pub use config::{KdfConfig, SecurityConfig};
pub use encrypted_file::{EncryptedFile, FileMode};
pub use erase::{overwrite_and_remove, EraseReport, FileScrubber, Scrubber, SecureEraser};
pub use error::{CryptoError, ErrorKind, Result};
pub use keys::{KeyCustody, KeyRecord};
pub use openpgp::{ImportedKey, PgpEncryptedFile, PgpEnvironment};
pub use password::{
    derive_auth_hash, generate_random_key, generate_random_password, generate_random_salt,
    PasswordHasher,
};
pub use path_guard::directory_traversal_check;
