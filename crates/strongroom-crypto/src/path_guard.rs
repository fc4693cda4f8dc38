//! Containment check for paths built from untrusted input

use crate::{CryptoError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::error;

/// Ensure `untrusted_path` resolves to a location inside `trusted_prefix`.
///
/// Relative paths are resolved against the current directory and `..` is
/// folded lexically (symlinks are not followed). Containment is decided per
/// path component, so `/srv/data_other` is not inside `/srv/data`. Returns
/// the normalized absolute path on success.
pub fn directory_traversal_check(
    trusted_prefix: impl AsRef<Path>,
    untrusted_path: impl AsRef<Path>,
) -> Result<PathBuf> {
    let trusted_prefix = trusted_prefix.as_ref();
    if !trusted_prefix.is_absolute() {
        return Err(CryptoError::InvalidTrustedPrefix(trusted_prefix.to_path_buf()));
    }

    let untrusted_path = untrusted_path.as_ref();
    let absolute = if untrusted_path.is_absolute() {
        untrusted_path.to_path_buf()
    } else {
        std::env::current_dir()?.join(untrusted_path)
    };

    let prefix = normalize(trusted_prefix);
    let candidate = normalize(&absolute);

    if !candidate.starts_with(&prefix) {
        error!(
            prefix = %prefix.display(),
            path = %candidate.display(),
            "Blocked file operation out of the expected path"
        );
        return Err(CryptoError::DirectoryTraversal {
            prefix,
            path: candidate,
        });
    }

    Ok(candidate)
}

/// Lexically fold `.` and `..`; `..` never climbs above the root
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}
