//! Ephemeral OpenPGP keyrings for recipient delivery
//!
//! A [`PgpEnvironment`] lives for one delivery: it gets a private, owner-only
//! home directory, imports the recipient's armored public key, encrypts
//! files or messages to it, and is torn down again. Environments are never
//! shared, so concurrent deliveries cannot race on a keyring.
//!
//! Every imported key is trusted as-is; there is no web-of-trust. Encryption
//! failures come back as [`CryptoError::PgpEncryption`] for callers to
//! branch on, never as a panic.

use crate::{CryptoError, Result, SecurityConfig};
use chrono::{DateTime, Utc};
use pgp::{
    crypto::sym::SymmetricKeyAlgorithm, types::PublicKeyTrait, ArmorOptions, Deserializable,
    Message, SignedPublicKey,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error, instrument, warn};
use zeroize::Zeroizing;

/// Cipher used for the session key of every message
const SESSION_CIPHER: SymmetricKeyAlgorithm = SymmetricKeyAlgorithm::AES256;

/// Result of a successful key import
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedKey {
    /// Upper-case hex fingerprint of the primary key
    pub fingerprint: String,
    /// Expiration time, or the Unix epoch when the key never expires
    pub expiration: DateTime<Utc>,
}

impl ImportedKey {
    /// Whether the key carries an expiration time
    pub fn expires(&self) -> bool {
        self.expiration != DateTime::<Utc>::default()
    }
}

/// Handle to a file written by [`PgpEnvironment::encrypt_file`]
#[derive(Clone, Debug)]
pub struct PgpEncryptedFile {
    /// Recipient the file was encrypted to
    pub fingerprint: String,
    /// Where the armored ciphertext was written
    pub path: PathBuf,
    /// Ciphertext size in bytes
    pub size: u64,
}

struct RecipientKey {
    key: SignedPublicKey,
    expiration: DateTime<Utc>,
}

/// Throwaway keyring for one asymmetric delivery
pub struct PgpEnvironment {
    home: TempDir,
    keyring: BTreeMap<String, RecipientKey>,
}

impl PgpEnvironment {
    /// Create a fresh keyring home under the configured PGP root
    #[instrument(skip(config), fields(root = %config.pgp_root.display()))]
    pub fn create(config: &SecurityConfig) -> Result<Self> {
        fs::create_dir_all(&config.pgp_root).map_err(|e| {
            error!(error = %e, "Critical, OS error in operating with PGP home");
            CryptoError::PgpEnvironment(e.to_string())
        })?;

        let home = tempfile::Builder::new()
            .prefix("keyring-")
            .rand_bytes(8)
            .tempdir_in(&config.pgp_root)
            .map_err(|e| {
                error!(error = %e, "Critical, OS error in operating with PGP home");
                CryptoError::PgpEnvironment(e.to_string())
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(home.path(), fs::Permissions::from_mode(0o700))
                .map_err(|e| CryptoError::PgpEnvironment(e.to_string()))?;
        }

        debug!(home = %home.path().display(), "Created PGP environment");
        Ok(Self {
            home,
            keyring: BTreeMap::new(),
        })
    }

    /// Directory backing this keyring
    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Fingerprint and expiration of every imported key
    pub fn imported(&self) -> impl Iterator<Item = ImportedKey> + '_ {
        self.keyring.iter().map(|(fingerprint, recipient)| ImportedKey {
            fingerprint: fingerprint.clone(),
            expiration: recipient.expiration,
        })
    }

    /// Import an ASCII-armored public key
    pub fn load_key(&mut self, armored_key: &str) -> Result<ImportedKey> {
        let (key, _headers) = SignedPublicKey::from_string(armored_key).map_err(|e| {
            error!(error = %e, "Error in PGP key import");
            CryptoError::PgpKeyInvalid(e.to_string())
        })?;
        key.verify().map_err(|e| {
            error!(error = %e, "PGP key failed self-signature verification");
            CryptoError::PgpKeyInvalid(e.to_string())
        })?;

        let fingerprint = hex::encode_upper(key.fingerprint().as_bytes());
        if fingerprint.is_empty() {
            return Err(CryptoError::PgpKeyInvalid("key has no fingerprint".to_string()));
        }
        let expiration = key.expires_at().unwrap_or_default();

        fs::write(self.home.path().join(format!("{}.asc", fingerprint)), armored_key)
            .map_err(|e| CryptoError::PgpKeyInvalid(format!("unable to store key: {}", e)))?;

        debug!(fingerprint = %fingerprint, expiration = %expiration, "Imported PGP key");
        self.keyring
            .insert(fingerprint.clone(), RecipientKey { key, expiration });

        Ok(ImportedKey {
            fingerprint,
            expiration,
        })
    }

    /// Encrypt everything read from `input` to `output_path` for the
    /// recipient identified by `fingerprint`.
    ///
    /// The whole plaintext is buffered in memory (zeroized afterwards)
    /// before sealing, so peak memory is roughly twice the input size plus
    /// the armored output. Callers delivering large uploads must size for it.
    #[instrument(skip(self, input, output_path), fields(output = %output_path.as_ref().display()))]
    pub fn encrypt_file(
        &self,
        fingerprint: &str,
        mut input: impl Read,
        output_path: impl AsRef<Path>,
    ) -> Result<PgpEncryptedFile> {
        let output_path = output_path.as_ref();
        let recipient = self.recipient(fingerprint)?;

        let mut plaintext = Zeroizing::new(Vec::new());
        input
            .read_to_end(&mut plaintext)
            .map_err(|e| encryption_failure("unable to read input", e))?;

        let literal_name = output_path
            .file_stem()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let armored = seal(
            &recipient.key,
            Message::new_literal_bytes(literal_name, &plaintext),
        )?;

        if let Err(e) = fs::write(output_path, armored.as_bytes()) {
            match fs::remove_file(output_path) {
                Err(remove_err) if remove_err.kind() != std::io::ErrorKind::NotFound => warn!(
                    path = %output_path.display(),
                    error = %remove_err,
                    "Unable to remove partial PGP output"
                ),
                _ => {}
            }
            return Err(encryption_failure("unable to write output", e));
        }
        let size = fs::metadata(output_path)
            .map_err(|e| encryption_failure("unable to stat output", e))?
            .len();

        debug!(size, "Encrypted file for recipient");
        Ok(PgpEncryptedFile {
            fingerprint: normalize_fingerprint(fingerprint),
            path: output_path.to_path_buf(),
            size,
        })
    }

    /// Encrypt a UTF-8 message and return it ASCII-armored
    pub fn encrypt_message(&self, fingerprint: &str, plaintext: &str) -> Result<String> {
        let recipient = self.recipient(fingerprint)?;
        seal(&recipient.key, Message::new_literal("", plaintext))
    }

    /// Remove the keyring directory; failures are logged, never raised
    pub fn destroy_environment(self) {
        let home = self.home.path().to_path_buf();
        match self.home.close() {
            Ok(()) => debug!(home = %home.display(), "Destroyed PGP environment"),
            Err(e) => error!(
                home = %home.display(),
                error = %e,
                "Unable to clean temporary PGP environment"
            ),
        }
    }

    fn recipient(&self, fingerprint: &str) -> Result<&RecipientKey> {
        let fingerprint = normalize_fingerprint(fingerprint);
        let recipient = self.keyring.get(&fingerprint).ok_or_else(|| {
            CryptoError::PgpEncryption(format!("no public key for {}", fingerprint))
        })?;

        if recipient.expiration != DateTime::<Utc>::default() && recipient.expiration <= Utc::now()
        {
            return Err(CryptoError::PgpEncryption(format!(
                "key {} expired at {}",
                fingerprint, recipient.expiration
            )));
        }
        Ok(recipient)
    }
}

impl std::fmt::Debug for PgpEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgpEnvironment")
            .field("home", &self.home.path())
            .field("keys", &self.keyring.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Encrypt to the first encryption-capable subkey, falling back to the
/// primary key, and armor the result
fn seal(key: &SignedPublicKey, message: Message) -> Result<String> {
    let mut rng = rand::thread_rng();
    let encrypted = match key.public_subkeys.iter().find(|sub| sub.is_encryption_key()) {
        Some(subkey) => message.encrypt_to_keys_seipdv1(&mut rng, SESSION_CIPHER, &[subkey]),
        None => message.encrypt_to_keys_seipdv1(&mut rng, SESSION_CIPHER, &[key]),
    }
    .map_err(|e| encryption_failure("encryption failed", e))?;

    encrypted
        .to_armored_string(ArmorOptions::default())
        .map_err(|e| encryption_failure("armoring failed", e))
}

fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn encryption_failure(context: &str, err: impl std::fmt::Display) -> CryptoError {
    error!(error = %err, "{}", context);
    CryptoError::PgpEncryption(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = include_str!("../tests/fixtures/recipient.asc");
    const RECIPIENT_FPR: &str = "AC9A2BDB43CE574BBC70C7D58B473BAC343F5B53";

    fn environment(root: &Path) -> PgpEnvironment {
        PgpEnvironment::create(&SecurityConfig::new(root)).unwrap()
    }

    #[test]
    fn test_environments_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = environment(dir.path());
        let b = environment(dir.path());

        assert_ne!(a.home(), b.home());
        assert!(a.home().starts_with(dir.path().join("pgp")));
    }

    #[cfg(unix)]
    #[test]
    fn test_home_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let env = environment(dir.path());
        let mode = fs::metadata(env.home()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_destroy_removes_home() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = environment(dir.path());
        env.load_key(RECIPIENT).unwrap();
        let home = env.home().to_path_buf();
        assert!(home.join(format!("{}.asc", RECIPIENT_FPR)).is_file());

        env.destroy_environment();
        assert!(!home.exists());
    }

    #[test]
    fn test_fingerprint_lookup_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = environment(dir.path());
        env.load_key(RECIPIENT).unwrap();

        let spaced = "ac9a 2bdb 43ce 574b bc70  c7d5 8b47 3bac 343f 5b53";
        assert!(env.encrypt_message(spaced, "hi").is_ok());
    }

    #[test]
    fn test_imported_listing() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = environment(dir.path());
        assert_eq!(env.imported().count(), 0);

        env.load_key(RECIPIENT).unwrap();
        let listed: Vec<ImportedKey> = env.imported().collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fingerprint, RECIPIENT_FPR);
        assert!(!listed[0].expires());
    }
}
