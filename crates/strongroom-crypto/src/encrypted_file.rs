//! Encrypt-on-write, decrypt-on-read files
//!
//! An [`EncryptedFile`] never puts plaintext on disk: every chunk handed to
//! it is run through AES-CTR before it reaches the underlying file. Reading
//! rewinds the file and starts a fresh decrypting keystream from the same
//! key and counter nonce, so the two directions never share stream state.
//!
//! Lifecycle: `Init -> Writing -> Finalized -> Reading -> Closed`. Once
//! reading has begun, further writes are refused with
//! [`CryptoError::CipherState`] because the keystream position no longer
//! matches the end of the ciphertext.

use crate::{
    keys::{KeyCustody, KeyRecord},
    CryptoError, Result,
};
use aes::{Aes128, Aes192, Aes256};
use chrono::{DateTime, Utc};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::{rngs::OsRng, RngCore};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, instrument, warn};

/// Suffix of ciphertext files
pub const CIPHERTEXT_SUFFIX: &str = "aes";

/// How many times `create` re-mints when a ciphertext name is already taken
const MAX_CREATE_ATTEMPTS: usize = 8;

/// Position of an encrypted file in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    /// Freshly created, nothing written yet
    Init,
    /// At least one chunk has been encrypted and written
    Writing,
    /// Ciphertext flushed; ready to be read back
    Finalized,
    /// Decrypting from the start of the file
    Reading,
    /// Handle released
    Closed,
}

/// AES in counter mode with a 128-bit big-endian counter
enum CtrCipher {
    Aes128(ctr::Ctr128BE<Aes128>),
    Aes192(ctr::Ctr128BE<Aes192>),
    Aes256(ctr::Ctr128BE<Aes256>),
}

impl CtrCipher {
    fn new(record: &KeyRecord) -> Result<Self> {
        let (key, iv) = (record.key(), record.counter_nonce());
        let invalid = |e: ctr::cipher::InvalidLength| {
            CryptoError::key_load(record.key_id(), format!("unusable key material: {}", e))
        };

        let cipher = match key.len() {
            16 => Self::Aes128(ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv).map_err(invalid)?),
            24 => Self::Aes192(ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv).map_err(invalid)?),
            32 => Self::Aes256(ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv).map_err(invalid)?),
            n => {
                return Err(CryptoError::key_load(
                    record.key_id(),
                    format!("unsupported AES key length {}", n),
                ))
            }
        };
        Ok(cipher)
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// A file whose on-disk content is always AES-CTR ciphertext
pub struct EncryptedFile {
    custody: KeyCustody,
    key: KeyRecord,
    path: PathBuf,
    file: Option<File>,
    mode: FileMode,
    encryptor: CtrCipher,
    decryptor: CtrCipher,
    encryptor_finalized: bool,
    delete_on_close: bool,
    creation_date: DateTime<Utc>,
}

impl EncryptedFile {
    /// Mint a new key and open `<dir>/<key_id>.aes` for writing.
    ///
    /// The handle starts with `delete_on_close` set, so an abandoned upload
    /// loses its key when closed. Call [`avoid_delete`](Self::avoid_delete)
    /// to keep it.
    pub fn create(custody: &KeyCustody, dir: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(custody, dir, &mut OsRng)
    }

    /// Like [`create`](Self::create), drawing key ids from `id_rng`
    #[instrument(skip(custody, dir, id_rng), fields(dir = %dir.as_ref().display()))]
    pub(crate) fn create_with<R: RngCore + ?Sized>(
        custody: &KeyCustody,
        dir: impl AsRef<Path>,
        id_rng: &mut R,
    ) -> Result<Self> {
        let dir = dir.as_ref();

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let key = custody.mint_with(id_rng)?;
            let drop_key = |key: &KeyRecord| {
                if let Err(e) = custody.destroy(key.key_id()) {
                    warn!(key_id = %key.key_id(), error = %e, "Unable to drop unused key");
                }
            };

            let ciphers =
                CtrCipher::new(&key).and_then(|enc| CtrCipher::new(&key).map(|dec| (enc, dec)));
            let (encryptor, decryptor) = match ciphers {
                Ok(pair) => pair,
                Err(e) => {
                    drop_key(&key);
                    return Err(e);
                }
            };

            let path = dir.join(format!("{}.{}", key.key_id(), CIPHERTEXT_SUFFIX));
            let file = match create_ciphertext(&path) {
                Ok(file) => file,
                Err(e) => {
                    drop_key(&key);
                    if e.kind() == io::ErrorKind::AlreadyExists {
                        debug!(path = %path.display(), "Ciphertext name taken, minting again");
                        continue;
                    }
                    return Err(e.into());
                }
            };

            debug!(path = %path.display(), "Creating encrypted file");
            return Ok(Self {
                custody: custody.clone(),
                encryptor,
                decryptor,
                key,
                path,
                file: Some(file),
                mode: FileMode::Init,
                encryptor_finalized: false,
                delete_on_close: true,
                creation_date: Utc::now(),
            });
        }

        Err(CryptoError::KeyGeneration(format!(
            "no unused ciphertext name in {} after {} attempts",
            dir.display(),
            MAX_CREATE_ATTEMPTS
        )))
    }

    /// Reopen a persisted ciphertext; the key id is the file name up to the
    /// first dot. The returned handle never deletes the key on close.
    #[instrument(skip(custody, path), fields(path = %path.as_ref().display()))]
    pub fn open_existing(custody: &KeyCustody, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let key_id = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .unwrap_or_default()
            .to_string();

        debug!(key_id = %key_id, "Opening secure file");
        let key = custody.load(&key_id)?;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(Self {
            custody: custody.clone(),
            encryptor: CtrCipher::new(&key)?,
            decryptor: CtrCipher::new(&key)?,
            key,
            path,
            file: Some(file),
            mode: FileMode::Finalized,
            encryptor_finalized: true,
            delete_on_close: false,
            creation_date: Utc::now(),
        })
    }

    /// Key id shared by the ciphertext and its key record
    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    /// Path of the ciphertext file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle position
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// When this handle was created
    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    /// Whether closing this handle destroys its key record
    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close
    }

    /// Keep the key record when this handle is closed
    pub fn avoid_delete(&mut self) {
        debug!(path = %self.path.display(), "Avoid delete");
        self.delete_on_close = false;
    }

    /// Encrypt `data` and append it to the ciphertext
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        match self.mode {
            FileMode::Init | FileMode::Writing => {}
            FileMode::Finalized | FileMode::Reading => {
                return Err(CryptoError::CipherState(
                    "cannot write after reading has started".to_string(),
                ))
            }
            FileMode::Closed => {
                return Err(CryptoError::CipherState("file is closed".to_string()))
            }
        }

        let mut chunk = data.to_vec();
        self.encryptor.apply(&mut chunk);
        let path = &self.path;
        self.file
            .as_mut()
            .ok_or_else(|| CryptoError::CipherState("file is closed".to_string()))?
            .write_all(&chunk)
            .map_err(|e| {
                error!(path = %path.display(), error = %e, "Unable to write encrypted chunk");
                e
            })?;

        self.mode = FileMode::Writing;
        Ok(())
    }

    /// Push any buffered ciphertext to disk. Runs at most once; later calls
    /// are no-ops. CTR has no trailing block, so this is purely a flush.
    pub fn finalize_write(&mut self) -> Result<()> {
        if self.encryptor_finalized {
            return Ok(());
        }
        self.encryptor_finalized = true;

        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            file.sync_data()?;
        }
        if matches!(self.mode, FileMode::Init | FileMode::Writing) {
            self.mode = FileMode::Finalized;
        }
        Ok(())
    }

    /// Decrypt up to `len` bytes, or everything left when `len` is `None`.
    ///
    /// The first call finalizes pending writes and rewinds to the start of
    /// the ciphertext. Once the ciphertext is exhausted the result is empty.
    pub fn read_chunk(&mut self, len: Option<usize>) -> Result<Vec<u8>> {
        match self.mode {
            FileMode::Reading => {}
            FileMode::Init | FileMode::Writing | FileMode::Finalized => self.begin_reading()?,
            FileMode::Closed => {
                return Err(CryptoError::CipherState("file is closed".to_string()))
            }
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CryptoError::CipherState("file is closed".to_string()))?;

        let mut data = Vec::new();
        match len {
            Some(n) => file.take(n as u64).read_to_end(&mut data)?,
            None => file.read_to_end(&mut data)?,
        };

        self.decryptor.apply(&mut data);
        Ok(data)
    }

    /// Decrypt everything from the current read position to the end
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.read_chunk(None)
    }

    fn begin_reading(&mut self) -> Result<()> {
        self.finalize_write()?;

        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0))?;
        }
        self.decryptor = CtrCipher::new(&self.key)?;
        self.mode = FileMode::Reading;

        debug!(path = %self.path.display(), "First seek");
        Ok(())
    }

    /// Release the handle. Never fails: a pending write is finalized, the
    /// key record is destroyed when `delete_on_close` is set, and every
    /// failure along the way is logged and skipped. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.mode == FileMode::Closed {
            return;
        }

        if let Err(e) = self.finalize_write() {
            warn!(path = %self.path.display(), error = %e, "Unable to finalize encrypted file");
        }

        if self.delete_on_close {
            if let Err(e) = self.custody.destroy(self.key.key_id()) {
                error!(key_id = %self.key.key_id(), error = %e, "Unable to remove key file");
            }
        }

        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                warn!(path = %self.path.display(), error = %e, "Unable to sync encrypted file on close");
            }
        }

        self.mode = FileMode::Closed;
    }
}

impl Drop for EncryptedFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EncryptedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFile")
            .field("key_id", &self.key.key_id())
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("delete_on_close", &self.delete_on_close)
            .finish()
    }
}

impl Write for EncryptedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf).map_err(into_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Read for EncryptedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let plaintext = self.read_chunk(Some(buf.len())).map_err(into_io_error)?;
        buf[..plaintext.len()].copy_from_slice(&plaintext);
        Ok(plaintext.len())
    }
}

fn into_io_error(err: CryptoError) -> io::Error {
    match err {
        CryptoError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

fn create_ciphertext(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
