//! Subcommands
//!
//! Each command writes its human-readable result to the supplied writer so
//! the binary can hand in stdout and tests can hand in a buffer.

use crate::error::CliError;
use clap::Subcommand;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use strongroom_crypto::{
    directory_traversal_check, generate_random_key, generate_random_password,
    generate_random_salt, EncryptedFile, KeyCustody, PasswordHasher, PgpEnvironment,
    SecureEraser, SecurityConfig,
};
use tracing::{info, warn};

/// Operations exposed on the command line
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Derive the authentication hash of a password
    HashPassword {
        /// Password to hash
        #[arg(long, env = "STRONGROOM_PASSWORD", hide_env_values = true)]
        password: String,

        /// Salt to use (a fresh one is generated when omitted)
        #[arg(long)]
        salt: Option<String>,
    },

    /// Print a fresh base64 salt
    GenSalt,

    /// Print a random alphanumeric key
    GenKey {
        /// Number of characters
        #[arg(short, long, default_value = "32")]
        length: usize,

        /// Produce a 10-character password instead
        #[arg(long, conflicts_with = "length")]
        password: bool,
    },

    /// Encrypt a plaintext file into the upload directory
    Store {
        /// Plaintext input
        input: PathBuf,

        /// Directory receiving the ciphertext
        #[arg(long)]
        dir: PathBuf,
    },

    /// Decrypt a stored upload
    Fetch {
        /// Ciphertext path (`<key_id>.aes`)
        path: PathBuf,

        /// Refuse paths outside this directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Write the plaintext here instead of the output stream
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Overwrite a file several times and unlink it
    Erase {
        path: PathBuf,

        /// Overwrite passes
        #[arg(short, long, default_value = "1")]
        iterations: usize,
    },

    /// Check that a path stays inside a trusted directory
    CheckPath {
        /// Trusted absolute directory
        prefix: PathBuf,

        /// Untrusted path
        path: PathBuf,
    },

    /// Validate an armored public key and print its fingerprint
    PgpImport {
        /// ASCII-armored public key
        key_file: PathBuf,
    },

    /// Re-encrypt a stored upload for a PGP recipient
    PgpEncrypt {
        /// ASCII-armored public key of the recipient
        #[arg(long)]
        key_file: PathBuf,

        /// Stored ciphertext to deliver
        upload: PathBuf,

        /// Armored output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Run `command` against `config`, reporting to `out`
pub fn execute(command: Command, config: &SecurityConfig, out: &mut dyn Write) -> Result<(), CliError> {
    match command {
        Command::HashPassword { password, salt } => {
            let salt = salt.unwrap_or_else(generate_random_salt);
            let hash = PasswordHasher::new(config.kdf).derive_auth_hash(&password, &salt)?;
            writeln!(out, "salt: {}", salt)?;
            writeln!(out, "hash: {}", hash)?;
        }
        Command::GenSalt => writeln!(out, "{}", generate_random_salt())?,
        Command::GenKey { length, password } => {
            let key = if password {
                generate_random_password()
            } else {
                generate_random_key(length)
            };
            writeln!(out, "{}", key)?;
        }
        Command::Store { input, dir } => {
            let path = store(config, &input, &dir)?;
            writeln!(out, "{}", path.display())?;
        }
        Command::Fetch { path, root, output } => fetch(config, &path, root.as_deref(), output.as_deref(), out)?,
        Command::Erase { path, iterations } => {
            if iterations == 0 {
                return Err(CliError::InvalidArgument("iterations must be at least 1".into()));
            }
            let report = SecureEraser::new().overwrite_and_remove(&path, iterations);
            if !report.scrubbed {
                warn!(path = %path.display(), "Overwrite incomplete");
            }
            writeln!(
                out,
                "passes: {} scrubbed: {} removed: {}",
                report.iterations, report.scrubbed, report.removed
            )?;
        }
        Command::CheckPath { prefix, path } => {
            let resolved = directory_traversal_check(&prefix, &path)?;
            writeln!(out, "{}", resolved.display())?;
        }
        Command::PgpImport { key_file } => {
            let armored = fs::read_to_string(&key_file)?;
            let mut env = PgpEnvironment::create(config)?;
            let imported = env.load_key(&armored);
            env.destroy_environment();

            let imported = imported?;
            if imported.expires() {
                writeln!(out, "{} expires {}", imported.fingerprint, imported.expiration.to_rfc3339())?;
            } else {
                writeln!(out, "{} never expires", imported.fingerprint)?;
            }
        }
        Command::PgpEncrypt { key_file, upload, output } => {
            let delivered = pgp_encrypt(config, &key_file, &upload, &output)?;
            writeln!(out, "{} {} bytes", delivered.display(), fs::metadata(&delivered)?.len())?;
        }
    }
    Ok(())
}

fn store(config: &SecurityConfig, input: &Path, dir: &Path) -> Result<PathBuf, CliError> {
    let custody = KeyCustody::new(config.clone())?;
    let mut plaintext = File::open(input)?;
    let mut upload = EncryptedFile::create(&custody, dir)?;

    let copied = io::copy(&mut plaintext, &mut upload).and_then(|_| upload.flush());
    if let Err(e) = copied {
        let path = upload.path().to_path_buf();
        upload.close();
        SecureEraser::new().overwrite_and_remove(&path, 1);
        return Err(e.into());
    }

    upload.finalize_write()?;
    upload.avoid_delete();
    upload.close();

    info!(key_id = %upload.key_id(), path = %upload.path().display(), "Stored upload");
    Ok(upload.path().to_path_buf())
}

fn fetch(
    config: &SecurityConfig,
    path: &Path,
    root: Option<&Path>,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let path = match root {
        Some(root) => directory_traversal_check(root, path)?,
        None => path.to_path_buf(),
    };

    let custody = KeyCustody::new(config.clone())?;
    let mut stored = EncryptedFile::open_existing(&custody, &path)?;

    match output {
        Some(output) => {
            let mut file = File::create(output)?;
            io::copy(&mut stored, &mut file)?;
            file.sync_all()?;
        }
        None => {
            io::copy(&mut stored, out)?;
        }
    }
    Ok(())
}

fn pgp_encrypt(config: &SecurityConfig, key_file: &Path, upload: &Path, output: &Path) -> Result<PathBuf, CliError> {
    let armored = fs::read_to_string(key_file)?;
    let custody = KeyCustody::new(config.clone())?;
    let stored = EncryptedFile::open_existing(&custody, upload)?;

    let mut env = PgpEnvironment::create(config)?;
    let result = env
        .load_key(&armored)
        .and_then(|imported| env.encrypt_file(&imported.fingerprint, stored, output));
    env.destroy_environment();

    let delivered = result?;
    info!(fingerprint = %delivered.fingerprint, size = delivered.size, "Delivered upload");
    Ok(delivered.path)
}
