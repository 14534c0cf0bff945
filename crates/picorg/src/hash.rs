//! Content fingerprinting.
//!
//! Fingerprints are SHA-256 digests of file content. Files are streamed
//! through a fixed buffer, so memory use does not grow with file size.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FileError;

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
const FINGERPRINT_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest of an image's bytes. The dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses a persisted fingerprint. Returns `None` unless the value is
    /// 64 hex characters; uppercase input is normalized.
    pub fn parse(hex: &str) -> Option<Self> {
        if hex.len() == FINGERPRINT_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and file names.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes content fingerprints for image files.
#[derive(Debug, Clone)]
pub struct HashComputer {
    buffer_size: usize,
}

impl HashComputer {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Uses a custom read buffer size (minimum 1 byte).
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Fingerprints the file at `path`.
    pub fn hash(&self, path: &Path) -> Result<Fingerprint, FileError> {
        let file = File::open(path).map_err(|e| FileError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.hash_reader(file).map_err(|e| FileError::Read {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Fingerprints everything readable from `reader`.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<Fingerprint> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Fingerprint(format!("{:x}", hasher.finalize())))
    }
}

impl Default for HashComputer {
    fn default() -> Self {
        Self::new()
    }
}
