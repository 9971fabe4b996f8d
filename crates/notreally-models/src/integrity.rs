use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("failed to open artifact: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read artifact: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact checksum mismatch ({path})\n  expected: {expected}\n  got:      {got}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Compute the SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, IntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| IntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf).map_err(|source| IntegrityError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a file against an expected hex digest (case-insensitive).
pub fn verify_file_sha256(path: &Path, expected_sha256: &str) -> Result<(), IntegrityError> {
    let digest = sha256_file_hex(path)?;
    if !digest.eq_ignore_ascii_case(expected_sha256.trim()) {
        return Err(IntegrityError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }
    Ok(())
}
