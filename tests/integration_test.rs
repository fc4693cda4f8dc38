//! Integration tests for Strongroom
//!
//! These tests drive the operator commands and the library side by side to
//! verify the full upload lifecycle.

use std::fs;
use std::path::{Path, PathBuf};
use strongroom_cli::{execute, Command};
use strongroom_crypto::{
    overwrite_and_remove, CryptoError, EncryptedFile, FileMode, KdfConfig, KeyCustody,
    PasswordHasher, PgpEnvironment, SecurityConfig,
};

const RECIPIENT: &str = include_str!("../crates/strongroom-crypto/tests/fixtures/recipient.asc");
const RECIPIENT_FPR: &str = "AC9A2BDB43CE574BBC70C7D58B473BAC343F5B53";

fn config(root: &Path) -> SecurityConfig {
    SecurityConfig::new(root.join("state")).with_kdf(KdfConfig { log_n: 4, r: 8, p: 1 })
}

fn run(command: Command, config: &SecurityConfig) -> String {
    let mut out = Vec::new();
    execute(command, config, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

/// Upload arrives, is kept, later read back and finally erased
#[test_log::test]
fn test_upload_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let custody = KeyCustody::new(config.clone()).unwrap();
    let uploads = dir.path().join("uploads");
    fs::create_dir_all(&uploads).unwrap();

    // Receive
    let mut upload = EncryptedFile::create(&custody, &uploads).unwrap();
    for chunk in [&b"first "[..], b"second ", b"third"] {
        upload.write_chunk(chunk).unwrap();
    }
    upload.finalize_write().unwrap();
    upload.avoid_delete();
    let key_id = upload.key_id().to_string();
    let path = upload.path().to_path_buf();
    upload.close();

    assert_eq!(path, uploads.join(format!("{}.aes", key_id)));
    assert!(custody.key_path(&key_id).exists());

    // Read back through the operator command
    let fetched = run(
        Command::Fetch {
            path: path.clone(),
            root: Some(uploads.clone()),
            output: None,
        },
        &config,
    );
    assert_eq!(fetched, "first second third");

    // Retire: shred the key, scrub the ciphertext
    custody.destroy(&key_id).unwrap();
    let report = overwrite_and_remove(&path, 1);
    assert!(report.removed);
    assert!(fs::read_dir(&uploads).unwrap().next().is_none());
    assert!(!custody.key_path(&key_id).exists());
}

/// Plaintext stored by the operator is readable through the library
#[test_log::test]
fn test_cli_store_library_read() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let input = dir.path().join("report.txt");
    let plaintext: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&input, &plaintext).unwrap();

    let stored = run(
        Command::Store {
            input,
            dir: dir.path().to_path_buf(),
        },
        &config,
    );
    let stored = PathBuf::from(stored.trim_end());

    let custody = KeyCustody::new(config).unwrap();
    let mut file = EncryptedFile::open_existing(&custody, &stored).unwrap();
    assert_eq!(file.mode(), FileMode::Finalized);

    let mut head = file.read_chunk(Some(10)).unwrap();
    head.extend(file.read_all().unwrap());
    assert_eq!(head, plaintext);
}

/// Stored upload is delivered to a recipient without touching plaintext on disk
#[test_log::test]
fn test_deliver_to_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let custody = KeyCustody::new(config.clone()).unwrap();

    let mut upload = EncryptedFile::create(&custody, dir.path()).unwrap();
    upload.write_chunk(b"whistle").unwrap();
    upload.avoid_delete();
    upload.close();

    let mut env = PgpEnvironment::create(&config).unwrap();
    let imported = env.load_key(RECIPIENT).unwrap();
    assert_eq!(imported.fingerprint, RECIPIENT_FPR);
    assert_eq!(env.imported().count(), 1);

    let stored = EncryptedFile::open_existing(&custody, upload.path()).unwrap();
    let delivered = env
        .encrypt_file(RECIPIENT_FPR, stored, dir.path().join("tip.pgp"))
        .unwrap();
    assert_eq!(delivered.size, fs::metadata(&delivered.path).unwrap().len());

    let message = env.encrypt_message(RECIPIENT_FPR, "new tip received").unwrap();
    assert!(message.starts_with("-----BEGIN PGP MESSAGE-----"));

    env.destroy_environment();
    assert_eq!(fs::read_dir(&config.pgp_root).unwrap().count(), 0);

    // The stored upload outlives the delivery
    assert!(upload.path().exists());
    assert!(custody.key_path(upload.key_id()).exists());
}

/// Password hashes agree between the operator command and the library
#[test]
fn test_password_hash_agrees() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let output = run(
        Command::HashPassword {
            password: "correct horse".into(),
            salt: Some("c2FsdA==".into()),
        },
        &config,
    );
    let expected = PasswordHasher::new(config.kdf)
        .derive_auth_hash("correct horse", "c2FsdA==")
        .unwrap();
    assert_eq!(output, format!("salt: c2FsdA==\nhash: {}\n", expected));
}

/// A temporary upload that is never kept cannot be decrypted afterwards
#[test]
fn test_temporary_upload_is_unrecoverable() {
    let dir = tempfile::tempdir().unwrap();
    let custody = KeyCustody::new(config(dir.path())).unwrap();

    let mut upload = EncryptedFile::create(&custody, dir.path()).unwrap();
    upload.write_chunk(b"transient").unwrap();
    let path = upload.path().to_path_buf();
    upload.close();

    assert!(path.exists());
    let reopened = EncryptedFile::open_existing(&custody, &path);
    assert!(matches!(reopened, Err(CryptoError::KeyLoad { .. })));
}
