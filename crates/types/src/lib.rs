//! Shared value types for Lakeset.
//!
//! These types are used by every crate in the workspace and guarantee their invariants once
//! constructed:
//! - [`NonEmptyText`]: trimmed, never empty.
//! - [`DatasetId`]: a canonical hyphenated UUID, safe to use as a directory name.
//! - [`GroupId`]: the numeric POSIX group that ACL grants name.
//! - [`Sha256Hash`]: a 32-byte SHA-256 digest with a lowercase hex representation.

mod digest;
mod ids;

pub use digest::Sha256Hash;
pub use ids::{AccessId, DatasetId, GroupId};

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// Errors raised when parsing identifiers and digests.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("invalid dataset id: {0}")]
    InvalidDatasetId(String),
    #[error("invalid group id: {0}")]
    InvalidGroupId(String),
    #[error("invalid sha256 digest: {0}")]
    InvalidDigest(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}
