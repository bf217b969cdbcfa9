//! Content fingerprints
//!
//! A fingerprint is a SHA-256 digest over a canonical byte encoding of some
//! content plus the configuration that shaped it. Fingerprints key the stage
//! cache and tie model versions back to the data that produced them, so the
//! encoding must never depend on hash-map iteration order or platform details.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a fingerprint from its hex form
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintParseError {
    #[error("fingerprint must be 64 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("fingerprint is not valid hex: {0}")]
    InvalidHex(String),
}

/// A 256-bit content digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest an arbitrary byte slice
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    /// Digest the canonical JSON form of a serializable value.
    ///
    /// Only use this for values whose serialization is order-stable
    /// (structs, vectors, `BTreeMap`s).
    pub fn of_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated hex form for logs and tables
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(FingerprintParseError::InvalidLength(s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| FingerprintParseError::InvalidHex(e.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Incremental, domain-separated fingerprint builder.
///
/// Every variable-length field is length-prefixed so that adjacent fields
/// cannot be shifted into each other to produce a collision.
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    /// Start a new fingerprint in the given domain (e.g. `"dataset"`)
    pub fn new(domain: &str) -> Self {
        let mut fp = Self {
            hasher: Sha256::new(),
        };
        fp.str(domain);
        fp
    }

    /// Feed a length-prefixed string
    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    /// Feed a length-prefixed byte slice
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Feed a single tag byte
    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.hasher.update([tag]);
        self
    }

    /// Feed an unsigned integer
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    /// Feed a signed integer
    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    /// Feed a float. Negative zero is folded into positive zero.
    pub fn f64(&mut self, value: f64) -> &mut Self {
        let normalized = if value == 0.0 { 0.0 } else { value };
        self.hasher.update(normalized.to_bits().to_le_bytes());
        self
    }

    /// Feed another fingerprint
    pub fn fingerprint(&mut self, value: &Fingerprint) -> &mut Self {
        self.hasher.update(value.as_bytes());
        self
    }

    /// Finish and return the digest
    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}
