use crate::{IntegrityError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Supported hashing algorithms for package integrity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256: the strong whole-package integrity gate
    Sha256,
    /// Blake3: the fast per-file manifest hash
    Blake3,
}

impl HashAlgorithm {
    /// Algorithm used for per-file manifest entries
    pub fn fast() -> Self {
        Self::Blake3
    }

    /// Algorithm used for whole-package integrity
    pub fn strong() -> Self {
        Self::Sha256
    }
}

/// Hasher trait for creating content hashes
pub trait Hasher {
    /// Update the hasher with data
    fn update(&mut self, data: &[u8]);

    /// Finalize the hash and return it as a hex string
    fn finalize(&mut self) -> String;
}

/// SHA-256 hasher implementation
#[derive(Default)]
pub struct Sha256Hasher {
    hasher: Sha256,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }
}

impl Hasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&mut self) -> String {
        let result = self.hasher.finalize_reset();
        hex::encode(result)
    }
}

/// Blake3 hasher implementation
#[derive(Default)]
pub struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }
}

impl Hasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&mut self) -> String {
        let result = self.hasher.finalize();
        self.hasher.reset();
        result.to_hex().to_string()
    }
}

fn hasher_for(algorithm: HashAlgorithm) -> Box<dyn Hasher> {
    match algorithm {
        HashAlgorithm::Sha256 => Box::new(Sha256Hasher::new()),
        HashAlgorithm::Blake3 => Box::new(Blake3Hasher::new()),
    }
}

/// Hash an in-memory buffer
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = hasher_for(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash a stream without materializing it. Packages can run to hundreds of
/// megabytes, so all whole-package hashing goes through here.
pub fn hash_reader<R: Read>(mut reader: R, algorithm: HashAlgorithm) -> Result<String> {
    let mut hasher = hasher_for(algorithm);
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize())
}

/// Hash a file on disk
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let file = std::fs::File::open(path)?;
    hash_reader(std::io::BufReader::new(file), algorithm)
}

/// Generic checksum verifier
#[derive(Debug)]
pub struct ChecksumVerifier {
    algorithm: HashAlgorithm,
}

impl ChecksumVerifier {
    /// Create a new verifier with a specific algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Calculate checksum for given data
    pub fn calculate(&self, data: &[u8]) -> String {
        hash_bytes(data, self.algorithm)
    }

    /// Verify data against an expected checksum
    pub fn verify(&self, data: &[u8], expected_checksum: &str) -> Result<()> {
        let actual_checksum = self.calculate(data);
        if secure_compare(&actual_checksum, &expected_checksum.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(IntegrityError::checksum_mismatch(expected_checksum, actual_checksum).into())
        }
    }

    /// Verify a stream of data against an expected checksum
    pub fn verify_stream<R: Read>(&self, reader: R, expected_checksum: &str) -> Result<()> {
        let actual_checksum = hash_reader(reader, self.algorithm)?;
        if secure_compare(&actual_checksum, &expected_checksum.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(IntegrityError::checksum_mismatch(expected_checksum, actual_checksum).into())
        }
    }
}

/// Securely compare two checksums to prevent timing attacks
pub fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    subtle::ConstantTimeEq::ct_eq(a.as_bytes(), b.as_bytes()).into()
}
