//! Fundamental types used throughout tidepool.

use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 hash.
///
/// This is the canonical content-hash type used throughout tidepool for
/// bucket identities, level hashes, and state descriptors.
///
/// # Examples
///
/// ```rust
/// use tidepool_common::Hash256;
///
/// // Hash some data
/// let hash = Hash256::hash(b"hello world");
/// assert!(!hash.is_zero());
///
/// // Convert to/from hex
/// let hex_str = hash.to_hex();
/// let parsed = Hash256::from_hex(&hex_str).unwrap();
/// assert_eq!(hash, parsed);
///
/// // Create from raw bytes
/// let zeros = Hash256::from_bytes([0u8; 32]);
/// assert!(zeros.is_zero());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (all bytes are 0x00).
    ///
    /// Used as the sentinel identity of the empty bucket.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Compute the SHA-256 hash of arbitrary data.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Returns a reference to the underlying 32-byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Creates a `Hash256` from a 32-byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Creates a `Hash256` from a hexadecimal string.
    ///
    /// The string must be exactly 64 hex characters (representing 32 bytes).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly
    /// 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Converts the hash to a lowercase hexadecimal string.
    ///
    /// The resulting string is always 64 characters long.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns `true` if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_hash() {
        let hash = Hash256::hash(b"hello");
        assert!(!hash.is_zero());

        // Same input should produce same hash
        let hash2 = Hash256::hash(b"hello");
        assert_eq!(hash, hash2);

        // Different input should produce different hash
        let hash3 = Hash256::hash(b"world");
        assert_ne!(hash, hash3);
    }

    #[test]
    fn test_hash256_hex() {
        let hash = Hash256::hash(b"test");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        let parsed = Hash256::from_hex(&hex).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_hash256_hex_rejects_bad_input() {
        assert!(Hash256::from_hex("zz").is_err());
        assert!(Hash256::from_hex("abcd").is_err());
    }

    #[test]
    fn test_hash256_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256::hash(b"test").is_zero());
        assert_eq!(Hash256::ZERO.to_hex(), "0".repeat(64));
    }
}
