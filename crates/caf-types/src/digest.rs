use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Size of a raw digest in bytes (160-bit hash).
pub const DIGEST_BYTES: usize = 20;

/// Length of the hex rendering of a digest.
pub const DIGEST_HEX_LEN: usize = DIGEST_BYTES * 2;

/// Number of leading hex characters that name a digest's shard directory.
pub const SHARD_LEN: usize = 2;

/// Content fingerprint used as the storage key for every object.
///
/// A `Digest` is always 40 lowercase hex characters. Two byte-identical
/// inputs always produce the same `Digest`. Values come from the digest
/// engine or from parsing previously stored text; the constructors reject
/// anything that is not a well-formed digest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Hex-encode a finished 160-bit hash.
    pub fn from_raw(hash: [u8; DIGEST_BYTES]) -> Self {
        Self(hex::encode(hash))
    }

    /// Parse a digest from its hex rendering.
    ///
    /// Uppercase hex is accepted and normalised to lowercase.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.len() != DIGEST_HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: DIGEST_HEX_LEN,
                actual: s.len(),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidHex(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The shard directory name: the first two hex characters.
    pub fn shard(&self) -> &str {
        &self.0[..SHARD_LEN]
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<[u8; DIGEST_BYTES]> for Digest {
    fn from(hash: [u8; DIGEST_BYTES]) -> Self {
        Self::from_raw(hash)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "0a4d55a8d778e5022fab701977c5d840bbc486d0";

    #[test]
    fn parse_valid() {
        let d = Digest::parse(SAMPLE).unwrap();
        assert_eq!(d.as_str(), SAMPLE);
        assert_eq!(d.shard(), "0a");
        assert_eq!(d.short_hex(), "0a4d55a8");
    }

    #[test]
    fn parse_normalises_uppercase() {
        let d = Digest::parse(&SAMPLE.to_uppercase()).unwrap();
        assert_eq!(d.as_str(), SAMPLE);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(
            Digest::parse("abc").unwrap_err(),
            TypeError::InvalidLength {
                expected: 40,
                actual: 3
            }
        );
        assert!(matches!(
            Digest::parse(""),
            Err(TypeError::InvalidLength { actual: 0, .. })
        ));
    }

    #[test]
    fn parse_rejects_non_hex() {
        let bad = "zz4d55a8d778e5022fab701977c5d840bbc486d0";
        assert!(matches!(Digest::parse(bad), Err(TypeError::InvalidHex(_))));
    }

    #[test]
    fn from_raw_is_hex() {
        let raw = [0xabu8; DIGEST_BYTES];
        let d = Digest::from_raw(raw);
        assert_eq!(d.as_str(), "ab".repeat(20));
        assert_eq!(Digest::from(raw), d);
    }

    #[test]
    fn display_and_debug() {
        let d = Digest::parse(SAMPLE).unwrap();
        assert_eq!(format!("{d}"), SAMPLE);
        assert_eq!(format!("{d:?}"), "Digest(0a4d55a8)");
    }

    #[test]
    fn serde_as_plain_string() {
        let d = Digest::parse(SAMPLE).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{SAMPLE}\""));
        let parsed: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn serde_rejects_malformed() {
        let res: Result<Digest, _> = serde_json::from_str("\"not-a-digest\"");
        assert!(res.is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Digest::from_raw([0x00; DIGEST_BYTES]);
        let b = Digest::from_raw([0x01; DIGEST_BYTES]);
        assert!(a < b);
    }

    proptest! {
        #[test]
        fn any_raw_hash_parses_back(raw in proptest::array::uniform20(any::<u8>())) {
            let d = Digest::from_raw(raw);
            prop_assert_eq!(d.as_str().len(), DIGEST_HEX_LEN);
            prop_assert_eq!(Digest::parse(d.as_str()).unwrap(), d);
        }
    }
}
