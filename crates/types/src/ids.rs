//! Identifier newtypes.
//!
//! Dataset identifiers double as directory names under the datasets root, so they are only
//! accepted in canonical form: a lowercase, hyphenated UUID (`8-4-4-4-12`). Anything else is
//! rejected rather than normalised, which keeps directory names and database keys identical.

use crate::IdError;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical dataset identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(Uuid);

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetId {
    /// Generates a fresh random dataset identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier that must already be in canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidDatasetId`] for uppercase, unhyphenated, braced or otherwise
    /// non-canonical input.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        if !Self::is_canonical(input) {
            return Err(IdError::InvalidDatasetId(format!(
                "expected a lowercase hyphenated UUID, got: '{input}'"
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| IdError::InvalidDatasetId(e.to_string()))
    }

    /// Returns true if `input` is a lowercase hyphenated UUID.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 36
            && input.bytes().enumerate().all(|(i, b)| match i {
                8 | 13 | 18 | 23 => b == b'-',
                _ => matches!(b, b'0'..=b'9' | b'a'..=b'f'),
            })
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DatasetId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DatasetId::parse(s)
    }
}

impl serde::Serialize for DatasetId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DatasetId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DatasetId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// POSIX group identifier named by ACL grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct GroupId(u32);

impl GroupId {
    pub const fn new(gid: u32) -> Self {
        Self(gid)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| IdError::InvalidGroupId(s.to_owned()))
    }
}

/// Row identifier of an access record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AccessId(pub i64);

impl fmt::Display for AccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
