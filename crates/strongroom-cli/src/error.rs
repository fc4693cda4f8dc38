//! Error types and exit codes

use strongroom_crypto::{CryptoError, ErrorKind};
use thiserror::Error;

/// CLI error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Stable error code printed on failure
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigurationError",
            Self::Crypto(e) => e.kind().as_str(),
            Self::Io(_) => ErrorKind::InternalError.as_str(),
            Self::InvalidArgument(_) => "InvalidArgument",
        }
    }

    /// Process exit status
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidArgument(_) => 2,
            Self::Config(_) => 3,
            Self::Crypto(e) => match e.kind() {
                ErrorKind::DirectoryTraversalError => 4,
                ErrorKind::KeyLoadError => 5,
                ErrorKind::PgpKeyInvalid | ErrorKind::PgpEncryptionFailure => 6,
                _ => 1,
            },
            Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codes_follow_crypto_kind() {
        let err = CliError::from(CryptoError::DirectoryTraversal {
            prefix: PathBuf::from("/srv"),
            path: PathBuf::from("/etc"),
        });
        assert_eq!(err.code(), "DirectoryTraversalError");
        assert_eq!(err.exit_code(), 4);

        let err = CliError::from(CryptoError::PgpEncryption("no such key".into()));
        assert_eq!(err.code(), "PGPEncryptionFailure");
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_internal_errors() {
        let err = CliError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.code(), "InternalError");
        assert_eq!(err.exit_code(), 1);

        let err = CliError::InvalidArgument("iterations must be positive".into());
        assert_eq!(err.exit_code(), 2);
    }
}
