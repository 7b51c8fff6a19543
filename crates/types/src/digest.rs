use crate::IdError;
use std::fmt;

/// A SHA-256 digest.
///
/// Stored as raw bytes so digests can be fed back into an accumulator, and rendered as 64
/// lowercase hex characters everywhere else (database, index files, notarization payloads).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a 64-character lowercase hex digest.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        if input.len() != 64 || input.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(IdError::InvalidDigest(input.to_owned()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(input, &mut bytes)
            .map_err(|_| IdError::InvalidDigest(input.to_owned()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", self.to_hex())
    }
}

impl serde::Serialize for Sha256Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Sha256Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::parse(&s).map_err(serde::de::Error::custom)
    }
}
