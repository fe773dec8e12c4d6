use data_encoding::HEXLOWER;
use md5::Md5;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::CellgateError;

pub const MD5_FINGERPRINT_LENGTH: usize = 47;
pub const SHA1_FINGERPRINT_LENGTH: usize = 59;
pub const SHA256_FINGERPRINT_LENGTH: usize = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl FingerprintAlgorithm {
    pub const ALL: [FingerprintAlgorithm; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    pub const fn rendered_len(self) -> usize {
        match self {
            Self::Md5 => MD5_FINGERPRINT_LENGTH,
            Self::Sha1 => SHA1_FINGERPRINT_LENGTH,
            Self::Sha256 => SHA256_FINGERPRINT_LENGTH,
        }
    }

    /// Picks the algorithm a stored fingerprint was made with from its length.
    pub fn for_fingerprint(fingerprint: &str) -> Result<Self, CellgateError> {
        Self::ALL
            .into_iter()
            .find(|a| a.rendered_len() == fingerprint.len())
            .ok_or(CellgateError::UnsupportedFingerprint(fingerprint.len()))
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => Md5::digest(data).to_vec(),
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Colon separated lowercase hex digest of the wire encoded key.
pub fn fingerprint_bytes(key_bytes: &[u8], algorithm: FingerprintAlgorithm) -> String {
    let hex = HEXLOWER.encode(&algorithm.digest(key_bytes));
    let mut out = String::with_capacity(algorithm.rendered_len());
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.extend(pair.iter().map(|b| *b as char));
    }
    out
}

pub fn fingerprint(key: &PublicKey, algorithm: FingerprintAlgorithm) -> String {
    fingerprint_bytes(&key.public_key_bytes(), algorithm)
}

/// Checks a key against a fingerprint of any supported algorithm.
pub fn matches_fingerprint(key: &PublicKey, expected: &str) -> Result<bool, CellgateError> {
    let algorithm = FingerprintAlgorithm::for_fingerprint(expected)?;
    Ok(fingerprint(key, algorithm) == expected.to_ascii_lowercase())
}
