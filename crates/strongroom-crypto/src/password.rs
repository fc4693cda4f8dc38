//! Password hashing and random tokens
//!
//! Credentials are stretched with scrypt into a 256-byte intermediate, which
//! is then condensed with SHA-512. Only the hex digest is ever stored.

use crate::{config::KdfConfig, CryptoError, Result};
use base64::Engine;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// Length of the scrypt intermediate in bytes
pub const SCRYPT_OUTPUT_LEN: usize = 256;

/// Salt entropy in bytes (128 bits)
pub const SALT_SIZE: usize = 16;

/// Length of generated passwords
pub const PASSWORD_LEN: usize = 10;

/// Length hint passed to scrypt parameter validation; the real output
/// length is the buffer handed to `scrypt::scrypt`
const SCRYPT_PARAMS_LEN: usize = 32;

/// Random string of `n` characters drawn from `[a-zA-Z0-9]`
pub fn generate_random_key(n: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

/// Base64 encoding of 16 random bytes
pub fn generate_random_salt() -> String {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    base64::engine::general_purpose::STANDARD.encode(salt)
}

/// Random 10-character alphanumeric password
pub fn generate_random_password() -> String {
    generate_random_key(PASSWORD_LEN)
}

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Hex-encoded SHA-512 digest
pub fn sha512_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha512::digest(data.as_ref()))
}

/// Derives authentication hashes with fixed scrypt costs
#[derive(Clone, Copy, Debug, Default)]
pub struct PasswordHasher {
    kdf: KdfConfig,
}

impl PasswordHasher {
    /// Create a hasher with the given scrypt costs
    pub fn new(kdf: KdfConfig) -> Self {
        Self { kdf }
    }

    /// The scrypt costs in use
    pub fn kdf(&self) -> &KdfConfig {
        &self.kdf
    }

    /// `hex(sha512(scrypt(password, salt)))`
    pub fn derive_auth_hash(&self, password: &str, salt: &str) -> Result<String> {
        let intermediate = self.scrypt(password.as_bytes(), salt.as_bytes())?;
        Ok(sha512_hex(&intermediate[..]))
    }

    fn scrypt(&self, password: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let params = scrypt::Params::new(self.kdf.log_n, self.kdf.r, self.kdf.p, SCRYPT_PARAMS_LEN)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let mut output = Zeroizing::new(vec![0u8; SCRYPT_OUTPUT_LEN]);
        scrypt::scrypt(password, salt, &params, &mut output)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(output)
    }
}

/// Derive an authentication hash with the default scrypt costs
pub fn derive_auth_hash(password: &str, salt: &str) -> Result<String> {
    PasswordHasher::default().derive_auth_hash(password, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap costs so the suite stays fast
    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::new(KdfConfig { log_n: 4, r: 8, p: 1 })
    }

    #[test]
    fn test_random_key_alphabet() {
        let key = generate_random_key(64);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_random_key(64), key);
    }

    #[test]
    fn test_random_salt_entropy() {
        let salt = generate_random_salt();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&salt)
            .unwrap();
        assert_eq!(raw.len(), SALT_SIZE);
        assert_ne!(generate_random_salt(), salt);
    }

    #[test]
    fn test_random_password() {
        let password = generate_random_password();
        assert_eq!(password.len(), PASSWORD_LEN);
    }

    #[test]
    fn test_digest_helpers() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha512_hex(b"").len(), 128);
    }

    #[test]
    fn test_auth_hash_is_deterministic() {
        let hasher = fast_hasher();
        let a = hasher.derive_auth_hash("correct horse", "c2FsdA==").unwrap();
        let b = hasher.derive_auth_hash("correct horse", "c2FsdA==").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_auth_hash_depends_on_salt_and_password() {
        let hasher = fast_hasher();
        let base = hasher.derive_auth_hash("password", "salt-one").unwrap();
        assert_ne!(base, hasher.derive_auth_hash("password", "salt-two").unwrap());
        assert_ne!(base, hasher.derive_auth_hash("Password", "salt-one").unwrap());
    }

    #[test]
    fn test_auth_hash_depends_on_costs() {
        let cheap = fast_hasher().derive_auth_hash("pw", "salt").unwrap();
        let dearer = PasswordHasher::new(KdfConfig { log_n: 5, r: 8, p: 1 })
            .derive_auth_hash("pw", "salt")
            .unwrap();
        assert_ne!(cheap, dearer);
    }

    #[test]
    fn test_default_costs() {
        let hasher = PasswordHasher::default();
        assert_eq!(hasher.kdf().log_n, 14);
        let hash = derive_auth_hash("unicode pässwörd", &generate_random_salt()).unwrap();
        assert_eq!(hash.len(), 128);
    }

    #[test]
    fn test_invalid_costs() {
        let hasher = PasswordHasher::new(KdfConfig { log_n: 70, r: 8, p: 1 });
        assert!(matches!(
            hasher.derive_auth_hash("pw", "salt"),
            Err(CryptoError::KeyDerivation(_))
        ));
    }
}
