//! Error types for the strongroom-crypto crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur in the at-rest protection layer
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Random key material could not be drawn
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A key record was written but did not materialize on disk
    #[error("unable to persist key file {}: {reason}", .path.display())]
    KeyPersist { path: PathBuf, reason: String },

    /// A key record is missing, unreadable or malformed
    #[error("unable to load key {key_id}: {reason}")]
    KeyLoad { key_id: String, reason: String },

    /// The encrypted stream was used out of order
    #[error("invalid cipher state: {0}")]
    CipherState(String),

    /// An untrusted path escapes its trusted root
    #[error("path {} escapes trusted directory {}", .path.display(), .prefix.display())]
    DirectoryTraversal { prefix: PathBuf, path: PathBuf },

    /// The trusted prefix handed to the traversal check is not absolute
    #[error("programming error: trusted prefix is not an absolute path: {}", .0.display())]
    InvalidTrustedPrefix(PathBuf),

    /// Armored key could not be imported
    #[error("invalid PGP key: {0}")]
    PgpKeyInvalid(String),

    /// Encryption to a recipient failed
    #[error("PGP encryption failed: {0}")]
    PgpEncryption(String),

    /// Ephemeral keyring could not be set up
    #[error("PGP environment error: {0}")]
    PgpEnvironment(String),

    /// Secure overwrite failed (only ever logged by the eraser)
    #[error("secure erase failed: {0}")]
    SecureErase(String),

    /// Password hardening failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Configuration values are unsupported
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Externally visible error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyGenerationError,
    KeyPersistError,
    KeyLoadError,
    CipherStateError,
    DirectoryTraversalError,
    PgpKeyInvalid,
    PgpEncryptionFailure,
    SecureEraseError,
    InternalError,
}

impl ErrorKind {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyGenerationError => "KeyGenerationError",
            Self::KeyPersistError => "KeyPersistError",
            Self::KeyLoadError => "KeyLoadError",
            Self::CipherStateError => "CipherStateError",
            Self::DirectoryTraversalError => "DirectoryTraversalError",
            Self::PgpKeyInvalid => "PGPKeyInvalid",
            Self::PgpEncryptionFailure => "PGPEncryptionFailure",
            Self::SecureEraseError => "SecureEraseError",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CryptoError {
    /// Map to the externally visible error code
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyGeneration(_) => ErrorKind::KeyGenerationError,
            Self::KeyPersist { .. } => ErrorKind::KeyPersistError,
            Self::KeyLoad { .. } => ErrorKind::KeyLoadError,
            Self::CipherState(_) => ErrorKind::CipherStateError,
            Self::DirectoryTraversal { .. } => ErrorKind::DirectoryTraversalError,
            Self::PgpKeyInvalid(_) => ErrorKind::PgpKeyInvalid,
            Self::PgpEncryption(_) => ErrorKind::PgpEncryptionFailure,
            Self::SecureErase(_) => ErrorKind::SecureEraseError,
            Self::InvalidTrustedPrefix(_)
            | Self::PgpEnvironment(_)
            | Self::KeyDerivation(_)
            | Self::InvalidConfig(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Base64Decode(_) => ErrorKind::InternalError,
        }
    }

    pub(crate) fn key_load(key_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::KeyLoad {
            key_id: key_id.to_string(),
            reason: reason.to_string(),
        }
    }
}
