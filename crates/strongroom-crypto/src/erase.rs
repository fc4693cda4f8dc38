//! Overwrite-then-unlink deletion
//!
//! Each pass rewrites the whole file with zeros, then ones, then a random
//! pattern whose block length changes per pass, reopening the file between
//! patterns so every write is pushed to disk. With probability 1/5 one extra
//! pass is added so the number of passes is not a fixed signature.
//!
//! This is best effort. On SSDs, flash with wear leveling, copy-on-write
//! filesystems or journaled metadata the old blocks may survive; the only
//! hard guarantee is that the directory entry is gone afterwards.

use crate::CryptoError;
use rand::{rngs::ThreadRng, Rng, RngCore};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, error, instrument};

/// Length of the fixed zero and one patterns (4 KiB)
pub const PATTERN_BLOCK_SIZE: usize = 4096;

/// Writes a repeating pattern over a file's current length
pub trait Scrubber {
    /// Overwrite every byte of `path` with `pattern`, repeated
    fn overwrite(&mut self, path: &Path, pattern: &[u8]) -> io::Result<()>;
}

/// Scrubber that rewrites the file in place and syncs it
#[derive(Debug, Default, Clone, Copy)]
pub struct FileScrubber;

impl Scrubber for FileScrubber {
    fn overwrite(&mut self, path: &Path, pattern: &[u8]) -> io::Result<()> {
        if pattern.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "overwrite pattern is empty",
            ));
        }

        let len = fs::metadata(path)?.len();
        let mut file = OpenOptions::new().write(true).open(path)?;

        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(pattern.len() as u64) as usize;
            file.write_all(&pattern[..n])?;
            remaining -= n as u64;
        }

        file.flush()?;
        file.sync_all()
    }
}

/// What a secure erase actually managed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseReport {
    /// Passes attempted, including the random extra one
    pub iterations: usize,
    /// Every pass completed without error
    pub scrubbed: bool,
    /// The file is no longer present
    pub removed: bool,
}

/// Erases files with an injectable randomness source and scrubber
pub struct SecureEraser<R = ThreadRng, S = FileScrubber> {
    rng: R,
    scrubber: S,
}

impl SecureEraser {
    /// Eraser backed by the thread-local CSPRNG and the filesystem
    pub fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            scrubber: FileScrubber,
        }
    }
}

impl Default for SecureEraser {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore, S: Scrubber> SecureEraser<R, S> {
    /// Replace the randomness source
    pub fn with_rng<R2: RngCore>(self, rng: R2) -> SecureEraser<R2, S> {
        SecureEraser {
            rng,
            scrubber: self.scrubber,
        }
    }

    /// Replace the scrubber
    pub fn with_scrubber<S2: Scrubber>(self, scrubber: S2) -> SecureEraser<R, S2> {
        SecureEraser {
            rng: self.rng,
            scrubber,
        }
    }

    /// Scrub `path` for `iterations` passes (plus the occasional extra one)
    /// and unlink it. Failures are logged; the unlink is always attempted.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn overwrite_and_remove(&mut self, path: impl AsRef<Path>, iterations: usize) -> EraseReport {
        let path = path.as_ref();
        let mut iterations = iterations;
        if self.rng.gen_range(1..=5u32) == 3 {
            iterations += 1;
        }

        debug!(iterations, "Starting secure deletion");

        let scrubbed = match self.scrub(path, iterations) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Unable to perform secure overwrite");
                false
            }
        };

        let removed = match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                error!(error = %e, "Unable to perform unlink operation");
                false
            }
        };

        debug!(scrubbed, removed, "Performed deletion");
        EraseReport {
            iterations,
            scrubbed,
            removed,
        }
    }

    fn scrub(&mut self, path: &Path, iterations: usize) -> Result<(), CryptoError> {
        let all_zeros = [0x00u8; PATTERN_BLOCK_SIZE];
        let all_ones = [0xFFu8; PATTERN_BLOCK_SIZE];

        for iteration in 0..iterations {
            let block = PATTERN_BLOCK_SIZE + self.rng.gen_range(1..=PATTERN_BLOCK_SIZE as u32) as usize;
            let mut random_pattern = vec![0u8; block];
            self.rng.fill_bytes(&mut random_pattern);

            debug!(iteration, iterations, "Executing rewrite iteration");

            for (name, pattern) in [
                ("zeros", &all_zeros[..]),
                ("ones", &all_ones[..]),
                ("random", &random_pattern[..]),
            ] {
                self.scrubber.overwrite(path, pattern).map_err(|e| {
                    CryptoError::SecureErase(format!("{} pattern, pass {}: {}", name, iteration, e))
                })?;
                debug!(pattern = name, "Overwritten file");
            }
        }

        Ok(())
    }
}

/// Securely erase `path` with the default eraser
pub fn overwrite_and_remove(path: impl AsRef<Path>, iterations: usize) -> EraseReport {
    SecureEraser::new().overwrite_and_remove(path, iterations)
}
