// src/hash.rs

//! Hashing for artifact integrity and content addressing
//!
//! Every hash kiln produces is SHA-256 rendered as lowercase hex:
//! - Artifact checksums written into metadata sidecars
//! - Assertion list hashes (build hash / package hash)
//! - Salted package fingerprints used as builder image tags

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Name used for SHA-256 entries in a checksum map
pub const SHA256: &str = "sha256";

/// Incremental SHA-256 hasher producing hex digests
#[derive(Clone, Default)]
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data into the hasher
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.state.update(data.as_ref());
    }

    /// Feed a string followed by a record separator
    ///
    /// Used when hashing lists, so that `["ab", "c"]` and `["a", "bc"]`
    /// produce different digests.
    pub fn update_field(&mut self, field: &str) {
        self.state.update(field.as_bytes());
        self.state.update([0x1e]);
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.state.finalize())
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher").finish_non_exhaustive()
    }
}

/// Compute SHA-256 of a byte slice
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute SHA-256 of everything readable from `reader`
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute SHA-256 of a file, streaming its content
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open {} for hashing: {}", path.display(), e))
    })?;
    Ok(hash_reader(&mut file)?)
}

/// Verify a file against an expected SHA-256 digest
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let actual = hash_file(path)?;
    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Named checksums of a file, keyed by algorithm name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksums(BTreeMap<String, String>);

impl Checksums {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute all supported checksums of a file
    pub fn generate(path: &Path) -> Result<Self> {
        let mut sums = Self::new();
        sums.0.insert(SHA256.to_string(), hash_file(path)?);
        Ok(sums)
    }

    pub fn get(&self, algorithm: &str) -> Option<&str> {
        self.0.get(algorithm).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare against another set of checksums
    ///
    /// Only algorithms present on both sides are compared; an empty
    /// intersection is treated as a mismatch.
    pub fn compare(&self, other: &Checksums) -> std::result::Result<(), (String, String)> {
        let mut compared = 0;
        for (algorithm, value) in &self.0 {
            if let Some(theirs) = other.0.get(algorithm) {
                compared += 1;
                if theirs != value {
                    return Err((value.clone(), theirs.clone()));
                }
            }
        }

        if compared == 0 {
            return Err((format!("{:?}", self.0), format!("{:?}", other.0)));
        }
        Ok(())
    }
}
