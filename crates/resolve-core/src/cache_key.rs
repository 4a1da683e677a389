//! Collision-resistant cache keys
//!
//! Provides [`CacheKey`], a 32-byte Blake3 digest over the canonicalized
//! token identity. Each identity part is length-prefixed, so no two distinct
//! four-part keys can produce the same preimage.

use crate::token::{TokenId, TokenKey};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

const DOMAIN_TAG: &[u8] = b"resolve.token.v1";

/// Errors decoding a cache key
#[derive(Debug, thiserror::Error)]
pub enum CacheKeyError {
    /// Wrong byte length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Not hex
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// A 32-byte cache key (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Create from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Key for a four-part token key
    #[must_use]
    pub fn for_key(key: &TokenKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TAG);
        for part in [
            key.token_type.as_str(),
            key.namespace.as_str(),
            key.scope.as_str(),
            key.identifier.as_str(),
        ] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Key for a token id
    ///
    /// Well-formed ids hash through their parsed key; anything else is hashed
    /// as one opaque part so the function stays total.
    #[must_use]
    pub fn for_token_id(id: &TokenId) -> Self {
        match id.key() {
            Ok(key) => Self::for_key(&key),
            Err(_) => {
                let raw = id.as_str();
                let mut hasher = blake3::Hasher::new();
                hasher.update(DOMAIN_TAG);
                hasher.update(&(raw.len() as u64).to_le_bytes());
                hasher.update(raw.as_bytes());
                Self(*hasher.finalize().as_bytes())
            }
        }
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for CacheKey {
    type Err = CacheKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(CacheKeyError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl serde::Serialize for CacheKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for CacheKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    #[test]
    fn key_is_deterministic() {
        let key = TokenKey::new(TokenType::Data, "artifact", "v1", "req");
        assert_eq!(CacheKey::for_key(&key), CacheKey::for_key(&key.clone()));
        assert_eq!(CacheKey::for_key(&key), key.id().cache_key());
    }

    #[test]
    fn boundary_shift_changes_key() {
        let a = TokenKey::new(TokenType::Data, "ab", "c", "d");
        let b = TokenKey::new(TokenType::Data, "a", "bc", "d");
        assert_ne!(CacheKey::for_key(&a), CacheKey::for_key(&b));
    }

    #[test]
    fn type_participates_in_key() {
        let a = TokenKey::new(TokenType::Data, "n", "s", "i");
        let b = TokenKey::new(TokenType::State, "n", "s", "i");
        assert_ne!(CacheKey::for_key(&a), CacheKey::for_key(&b));
    }

    #[test]
    fn hex_roundtrip() {
        let key = CacheKey::for_key(&TokenKey::new(TokenType::Context, "s", "v", "x"));
        let parsed: CacheKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(key.short().len(), 16);
    }

    #[test]
    fn rejects_short_hex() {
        assert!(matches!(
            "abcd".parse::<CacheKey>(),
            Err(CacheKeyError::InvalidLength { actual: 2, .. })
        ));
    }
}
