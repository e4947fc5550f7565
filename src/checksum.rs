//! Content digests for integrity verification.
//!
//! SHA-256 over canonical bytes, so identical logical state always yields an
//! identical digest across runs and platforms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::SaveError;

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Computes the digest of `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Computes the digest of several slices as one concatenated message.
    pub fn compute_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Verifies that `bytes` hash to `self`.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        Self::compute(bytes) == *self
    }

    /// Lowercase hex rendering, for logs and error messages.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use fmt::Write;
            // infallible for String
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Short prefix for log lines.
    pub fn short_hex(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl FromStr for Digest {
    type Err = SaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(SaveError::corruption(format!(
                "digest hex must be 64 characters, got {}",
                s.len()
            )));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hex = std::str::from_utf8(chunk)
                .map_err(|_| SaveError::corruption("digest hex is not ASCII"))?;
            out[i] = u8::from_str_radix(hex, 16)
                .map_err(|_| SaveError::corruption(format!("invalid digest hex byte '{hex}'")))?;
        }
        Ok(Self(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = Digest::compute(b"hello world");
        let b = Digest::compute(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_input_different_digest() {
        assert_ne!(Digest::compute(b"hello"), Digest::compute(b"hellp"));
    }

    #[test]
    fn test_parts_match_concatenation() {
        let whole = Digest::compute(b"economy\x01coins");
        let parts = Digest::compute_parts(&[b"economy", b"\x01", b"coins"]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn test_verify() {
        let d = Digest::compute(b"payload");
        assert!(d.verify(b"payload"));
        assert!(!d.verify(b"Payload"));
    }

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty string
        let d = Digest::compute(b"");
        assert_eq!(
            d.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let d = Digest::compute(b"roundtrip");
        let parsed: Digest = d.to_hex().parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert!("abc".parse::<Digest>().is_err());
        assert!("zz".repeat(32).parse::<Digest>().is_err());
    }
}
