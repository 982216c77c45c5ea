// src/hash.rs

//! Content hashing for manifests, archives and wheel RECORD files
//!
//! Two algorithms are supported:
//! - **SHA-256**: every manifest entry, every index entry, download verification
//! - **MD5**: only because repository indexes carry an `md5` field per archive
//!
//! Wheel `RECORD` files encode their digests as `sha256=<urlsafe base64, no padding>`,
//! so [`record_digest`] produces that form from the same hasher.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// SHA-256 of the empty byte sequence.
///
/// Dangling symlinks are recorded with this value.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Read buffer for streaming hashes (256 KiB)
const BUFFER_SIZE: usize = 1 << 18;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Md5,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Md5 => 16,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("invalid hash length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex in hash: {0}")]
    InvalidHex(String),
}

/// A hash value with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Hash {
    /// Create a hash from a hex string, validating length and characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        let expected = algorithm.hex_len();

        if value.len() != expected {
            return Err(HashError::InvalidLength {
                expected,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Md5(h) => h.update(data),
        }
    }

    fn finalize_raw(self) -> Vec<u8> {
        match self.state {
            HasherState::Sha256(h) => h.finalize().to_vec(),
            HasherState::Md5(h) => h.finalize().to_vec(),
        }
    }

    pub fn finalize(self) -> Hash {
        let algorithm = self.algorithm;
        Hash {
            algorithm,
            value: hex::encode(self.finalize_raw()),
        }
    }
}

/// Compute the hash of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the hash of everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Hash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Stream a file through the hasher
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<Hash> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}

/// SHA-256 hex digest of a byte slice
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}

/// SHA-256 hex digest of a file
pub fn sha256_file(path: &Path) -> io::Result<String> {
    Ok(hash_file(HashAlgorithm::Sha256, path)?.value)
}

/// MD5 and SHA-256 of a file in a single pass
pub fn md5_and_sha256_file(path: &Path) -> io::Result<(String, String)> {
    let mut file = File::open(path)?;
    let mut md5 = Hasher::new(HashAlgorithm::Md5);
    let mut sha = Hasher::new(HashAlgorithm::Sha256);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        md5.update(&buffer[..n]);
        sha.update(&buffer[..n]);
    }

    Ok((md5.finalize().value, sha.finalize().value))
}

/// Digest in wheel RECORD form: `sha256=<urlsafe base64 without padding>`
pub fn record_digest(data: &[u8]) -> String {
    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    hasher.update(data);
    format!("sha256={}", URL_SAFE_NO_PAD.encode(hasher.finalize_raw()))
}

/// Verification failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{algorithm} mismatch: expected {expected}, got {actual}")]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
    pub algorithm: HashAlgorithm,
}

/// Verify a file matches an expected hash, streaming its content
pub fn verify_file(path: &Path, expected: &Hash) -> Result<(), VerifyError> {
    let algorithm = expected.algorithm;
    let actual = hash_file(algorithm, path).map_err(|_| VerifyError {
        expected: expected.to_string(),
        actual: "<file read error>".to_string(),
        algorithm,
    })?;

    if actual.as_str() == expected.as_str() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual: actual.value,
            algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_empty_sha256_constant() {
        assert_eq!(sha256(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_md5_known_value() {
        let hash = hash_bytes(HashAlgorithm::Md5, b"");
        assert_eq!(hash.value, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash.value.len(), HashAlgorithm::Md5.hex_len());
    }

    #[test]
    fn test_file_hash_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"some content").unwrap();

        assert_eq!(sha256_file(&path).unwrap(), sha256(b"some content"));
        let (md5, sha) = md5_and_sha256_file(&path).unwrap();
        assert_eq!(md5, hash_bytes(HashAlgorithm::Md5, b"some content").value);
        assert_eq!(sha, sha256(b"some content"));
    }

    #[test]
    fn test_record_digest_format() {
        // Empty input: sha256 digest 47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU
        assert_eq!(
            record_digest(b""),
            "sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn test_hash_new_validates() {
        let hash = Hash::new(HashAlgorithm::Sha256, EMPTY_SHA256.to_uppercase()).unwrap();
        assert_eq!(hash.as_str(), EMPTY_SHA256);

        let md5 = Hash::new("md5".parse().unwrap(), "d41d8cd98f00b204e9800998ecf8427e").unwrap();
        assert_eq!(md5.algorithm, HashAlgorithm::Md5);

        assert!(matches!(
            Hash::new(HashAlgorithm::Sha256, "abc"),
            Err(HashError::InvalidLength { .. })
        ));
        assert!(matches!(
            Hash::new(HashAlgorithm::Md5, "zz".repeat(16)),
            Err(HashError::InvalidHex(_))
        ));
        assert!("blake3".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_verify_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();

        let empty = Hash::new(HashAlgorithm::Sha256, EMPTY_SHA256).unwrap();
        assert!(verify_file(&path, &empty).is_ok());

        std::fs::write(&path, b"changed").unwrap();
        let err = verify_file(&path, &empty).unwrap_err();
        assert_eq!(err.expected, EMPTY_SHA256);
        assert_eq!(err.actual, sha256(b"changed"));
    }
}
